use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Column semantics that drive filter dispatch and row normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    Text,
    Number,
    Uuid,
    Date,
    Timestamp,
    /// Native `text[]`
    Array,
    Jsonb,
    /// Comma-joined text column exposed as a list
    SimpleArray,
    /// `tsvector`; searchable, never filtered or serialized
    FullText,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub property: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

impl ColumnDef {
    pub const fn new(property: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Self { property, column, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    OneToMany,
    ManyToOne,
}

impl RelationKind {
    pub fn is_many(&self) -> bool {
        matches!(self, RelationKind::OneToMany)
    }
}

/// Join between this entity (`local_column`) and `target` (`foreign_column`).
#[derive(Debug, Clone, Copy)]
pub struct RelationDef {
    pub property: &'static str,
    pub kind: RelationKind,
    pub target: fn() -> &'static EntitySchema,
    pub local_column: &'static str,
    pub foreign_column: &'static str,
    /// Joined by `find_one_by_*` lookups
    pub eager: bool,
    /// Nested values are inserted together with the owner
    pub cascade_insert: bool,
}

/// Declared table layout of an entity.
#[derive(Debug)]
pub struct EntitySchema {
    pub name: &'static str,
    pub table: &'static str,
    pub primary_key: &'static [&'static str],
    pub columns: &'static [ColumnDef],
    pub relations: &'static [RelationDef],
}

/// A persisted resource type with a declared schema.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {
    fn schema() -> &'static EntitySchema;
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Invalid identifier '{identifier}' in entity {entity}")]
    InvalidIdentifier { entity: &'static str, identifier: String },

    #[error("Duplicate property '{property}' in entity {entity}")]
    DuplicateProperty { entity: &'static str, property: String },

    #[error("Entity {0} declares no primary key")]
    MissingPrimaryKey(&'static str),

    #[error("Column '{column}' referenced by {entity} is not declared")]
    UndeclaredColumn { entity: &'static str, column: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMeta {
    pub property: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
}

/// Reflected, validated view over an [`EntitySchema`].
#[derive(Debug)]
pub struct EntityMetadata {
    pub schema: &'static EntitySchema,
    by_property: HashMap<&'static str, FieldMeta>,
    by_column: HashMap<&'static str, FieldMeta>,
}

// Keyed by schema address; schemas are statics.
static METADATA_CACHE: Lazy<RwLock<HashMap<usize, Arc<EntityMetadata>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

impl EntityMetadata {
    /// Reflected metadata for `E`, computed on first use and cached for the process.
    pub fn of<E: Entity>() -> Result<Arc<Self>, MetadataError> {
        Self::for_schema(E::schema())
    }

    pub fn for_schema(schema: &'static EntitySchema) -> Result<Arc<Self>, MetadataError> {
        let key = schema as *const EntitySchema as usize;
        {
            let cache = METADATA_CACHE.read().unwrap_or_else(|e| e.into_inner());
            if let Some(metadata) = cache.get(&key) {
                return Ok(metadata.clone());
            }
        }

        let metadata = Arc::new(Self::reflect(schema)?);
        let mut cache = METADATA_CACHE.write().unwrap_or_else(|e| e.into_inner());
        Ok(cache.entry(key).or_insert(metadata).clone())
    }

    pub fn reflect(schema: &'static EntitySchema) -> Result<Self, MetadataError> {
        validate_identifier(schema.name, schema.name)?;
        validate_identifier(schema.name, schema.table)?;
        if schema.primary_key.is_empty() {
            return Err(MetadataError::MissingPrimaryKey(schema.name));
        }

        let mut by_property = HashMap::new();
        let mut by_column = HashMap::new();
        for def in schema.columns {
            validate_identifier(schema.name, def.column)?;
            let field = FieldMeta { property: def.property, column: def.column, kind: def.kind };
            if by_property.insert(def.property, field).is_some() || by_column.insert(def.column, field).is_some() {
                return Err(MetadataError::DuplicateProperty { entity: schema.name, property: def.property.to_string() });
            }
        }

        for column in schema.primary_key {
            if !by_column.contains_key(column) {
                return Err(MetadataError::UndeclaredColumn { entity: schema.name, column: column.to_string() });
            }
        }

        for relation in schema.relations {
            if by_property.contains_key(relation.property) {
                return Err(MetadataError::DuplicateProperty { entity: schema.name, property: relation.property.to_string() });
            }
            if !by_column.contains_key(relation.local_column) {
                return Err(MetadataError::UndeclaredColumn { entity: schema.name, column: relation.local_column.to_string() });
            }
            let target = (relation.target)();
            if !target.columns.iter().any(|c| c.column == relation.foreign_column) {
                return Err(MetadataError::UndeclaredColumn { entity: target.name, column: relation.foreign_column.to_string() });
            }
        }

        Ok(Self { schema, by_property, by_column })
    }

    /// Resolve a property name (`yearBorn`) or column name (`year_born`).
    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.by_property.get(name).or_else(|| self.by_column.get(name))
    }

    pub fn fields(&self) -> impl Iterator<Item = FieldMeta> + '_ {
        self.schema.columns.iter().map(|c| FieldMeta { property: c.property, column: c.column, kind: c.kind })
    }

    pub fn relation(&self, property: &str) -> Option<&'static RelationDef> {
        self.schema.relations.iter().find(|r| r.property == property)
    }

    pub fn search_column(&self) -> Option<&'static str> {
        self.schema.columns.iter().find(|c| c.kind == FieldKind::FullText).map(|c| c.column)
    }

    pub fn soft_delete_column(&self) -> Option<&'static str> {
        self.by_column.get("deleted_at").filter(|f| f.kind == FieldKind::Timestamp).map(|f| f.column)
    }

    pub fn created_at_column(&self) -> Option<&'static str> {
        self.by_column.get("created_at").map(|f| f.column)
    }

    pub fn updated_at_column(&self) -> Option<&'static str> {
        self.by_column.get("updated_at").filter(|f| f.kind == FieldKind::Timestamp).map(|f| f.column)
    }

    pub fn primary_key(&self) -> &'static [&'static str] {
        self.schema.primary_key
    }
}

pub(crate) fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_identifier(entity: &'static str, name: &str) -> Result<(), MetadataError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(MetadataError::InvalidIdentifier { entity, identifier: name.to_string() })
    }
}
