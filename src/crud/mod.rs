//! Generic CRUD façade over one entity type.
//!
//! `ApiCrud` turns [`QueryParams`] into joined, filtered, paginated reads and runs
//! mutations through the role-validation pipeline. Resource services compose it
//! with their own [`CrudOptions`] and [`CrudHooks`].

pub mod error;
pub mod validation;

use convert_case::{Case, Casing};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool, Row};
use std::sync::Arc;

use crate::config::CONFIG;
use crate::database::hydrate::{decode_row, hydrate_rows, normalize_row};
use crate::database::metadata::{Entity, EntityMetadata};
use crate::database::paginated::WithMeta;
use crate::database::query_builder::{BuildOptions, BuiltQuery, Conditions, PageMode, QueryBuilder, QueryExtension, RelationOption};
use crate::database::writer::{RecordWriter, RETURNING_COLUMN};
use crate::database::{DatabaseError, DatabaseManager};
use crate::filter::{QueryParams, SqlResult};

pub use error::{CrudError, ErrorKind};
pub use validation::{CrudHooks, FetchForValidation, RoleCheck, ValidateOptions, ValidationContext};

/// Per-resource configuration of the façade.
#[derive(Debug, Clone)]
pub struct CrudOptions {
    /// Root table alias, also used in error messages
    pub alias: String,
    pub relations: Vec<RelationOption>,
    /// Fields never used as filters by list queries
    pub reserved_fields: Vec<String>,
    /// Run full-text search against this joined alias instead of the root
    pub search_on_relation: Option<String>,
    pub auto_validate_on_ud: bool,
}

impl CrudOptions {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            relations: vec![],
            reserved_fields: vec!["createdAt".into(), "deletedAt".into(), "updatedAt".into()],
            search_on_relation: None,
            auto_validate_on_ud: true,
        }
    }

    pub fn relation(mut self, relation: RelationOption) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn reserved_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn search_on_relation(mut self, alias: impl Into<String>) -> Self {
        self.search_on_relation = Some(alias.into());
        self
    }

    pub fn auto_validate_on_ud(mut self, enabled: bool) -> Self {
        self.auto_validate_on_ud = enabled;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub with_deleted: bool,
    /// Overrides the entity's eager relations
    pub relations: Option<Vec<RelationOption>>,
}

impl FindOptions {
    pub fn with_deleted() -> Self {
        Self { with_deleted: true, relations: None }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    pub soft_delete: bool,
}

impl DeleteOptions {
    pub fn soft() -> Self {
        Self { soft_delete: true }
    }
}

/// Options for [`ApiCrud::get_many_by_relations_with_meta`].
#[derive(Debug, Clone, Default)]
pub struct RootPagination {
    pub native_offset: bool,
    pub count_with_extensions: bool,
    pub exclude: Vec<String>,
}

pub struct ApiCrud<E, C = (), T = ()> {
    pool: PgPool,
    options: CrudOptions,
    metadata: Arc<EntityMetadata>,
    hooks: CrudHooks<E, C, T>,
    unaccent: bool,
}

impl<E, C, T> Clone for ApiCrud<E, C, T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            options: self.options.clone(),
            metadata: self.metadata.clone(),
            hooks: self.hooks.clone(),
            unaccent: self.unaccent,
        }
    }
}

impl<E, C, T> ApiCrud<E, C, T>
where
    E: Entity,
    C: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    /// Reflects `E` and checks the configured relations; failures are configuration errors.
    pub fn new(pool: PgPool, options: CrudOptions) -> Result<Self, CrudError> {
        let metadata = EntityMetadata::of::<E>()?;
        QueryBuilder::new(&metadata, &options.alias)
            .relations(&options.relations)
            .search_on_relation(options.search_on_relation.as_deref())
            .build(&QueryParams::new(), &[], &BuildOptions::default())
            .map_err(|e| CrudError::Configuration(format!("{}: {}", options.alias, e)))?;

        Ok(Self { pool, options, metadata, hooks: CrudHooks::default(), unaccent: CONFIG.search.unaccent })
    }

    pub fn with_hooks(mut self, hooks: CrudHooks<E, C, T>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn alias(&self) -> &str {
        &self.options.alias
    }

    pub fn metadata(&self) -> &Arc<EntityMetadata> {
        &self.metadata
    }

    fn builder<'a>(&'a self, relations: &'a [RelationOption]) -> QueryBuilder<'a> {
        QueryBuilder::new(&self.metadata, &self.options.alias)
            .relations(relations)
            .reserved_fields(&self.options.reserved_fields)
            .search_on_relation(self.options.search_on_relation.as_deref())
            .unaccent(self.unaccent)
    }

    fn eager_relations(&self) -> Vec<RelationOption> {
        self.metadata
            .schema
            .relations
            .iter()
            .filter(|relation| relation.eager)
            .map(|relation| RelationOption::new(relation.property, relation.property))
            .collect()
    }

    fn store_error(&self, err: sqlx::Error) -> CrudError {
        CrudError::from_store(&self.options.alias, err)
    }

    fn decode(&self, value: Value) -> Result<E, CrudError> {
        serde_json::from_value(value)
            .map_err(|e| DatabaseError::QueryError(format!("Failed to decode {}: {}", self.options.alias, e)).into())
    }

    fn encode(&self, value: &impl Serialize) -> Result<Map<String, Value>, CrudError> {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(CrudError::bad_request(format!("Expected an object for {}", self.options.alias))),
            Err(e) => Err(CrudError::bad_request(e.to_string())),
        }
    }

    /// Run the row query (and the count, when built) and hydrate the documents.
    async fn execute(&self, built: &BuiltQuery) -> Result<(Vec<Value>, Option<i64>), CrudError> {
        let consistent = CONFIG.database.consistent_pagination && built.count.is_some();

        let (rows, total) = if consistent {
            let mut tx = self.pool.begin().await.map_err(|e| self.store_error(e))?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(|e| self.store_error(e))?;
            let rows = DatabaseManager::fetch_all(&mut *tx, &built.rows).await.map_err(|e| self.store_error(e))?;
            let total = match &built.count {
                Some(count) => Some(count_rows(&mut tx, count).await.map_err(|e| self.store_error(e))?),
                None => None,
            };
            tx.commit().await.map_err(|e| self.store_error(e))?;
            (rows, total)
        } else {
            let rows = DatabaseManager::fetch_all(&self.pool, &built.rows).await.map_err(|e| self.store_error(e))?;
            let total = match &built.count {
                Some(count) => Some(count_pool(&self.pool, count).await.map_err(|e| self.store_error(e))?),
                None => None,
            };
            (rows, total)
        };

        let decoded = rows
            .iter()
            .map(|row| decode_row(row, &built.plan))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.store_error(e))?;
        Ok((hydrate_rows(&built.plan, decoded), total))
    }

    async fn find_one_with(&self, conditions: &Conditions, options: &FindOptions) -> Result<Option<E>, CrudError> {
        let relations = options.relations.clone().unwrap_or_else(|| self.eager_relations());
        let build = BuildOptions {
            mode: PageMode::Unpaged,
            conditions: Some(conditions.to_predicate(&self.options.alias)),
            with_deleted: options.with_deleted,
            ..Default::default()
        };
        let built = self.builder(&relations).build(&QueryParams::new(), &[], &build)?;
        let (documents, _) = self.execute(&built).await?;
        documents.into_iter().next().map(|document| self.decode(document)).transpose()
    }

    /// NotFound when no row has this primary key.
    pub async fn find_one_by_id(&self, id: impl Into<Value>) -> Result<E, CrudError> {
        let id = id.into();
        let column = self.metadata.primary_key().first().copied().unwrap_or("id");
        let conditions = Conditions::new().with(column, id.clone());
        self.find_one_with(&conditions, &FindOptions::default())
            .await?
            .ok_or_else(|| CrudError::not_found(format!("No {} found with id: {}", self.options.alias, display(&id))))
    }

    /// First row matching `conditions`, with eager relations loaded.
    pub async fn find_one_by_conditions(&self, conditions: &Conditions, options: &FindOptions) -> Result<E, CrudError> {
        self.find_one_with(conditions, options)
            .await?
            .ok_or_else(|| CrudError::not_found(format!("No {} found with {}", self.options.alias, conditions)))
    }

    /// Every row matching `conditions`; an empty result is NotFound.
    pub async fn find_by_conditions(&self, conditions: &Conditions) -> Result<Vec<E>, CrudError> {
        let relations = self.eager_relations();
        let build = BuildOptions {
            mode: PageMode::Unpaged,
            conditions: Some(conditions.to_predicate(&self.options.alias)),
            ..Default::default()
        };
        let built = self.builder(&relations).build(&QueryParams::new(), &[], &build)?;
        let (documents, _) = self.execute(&built).await?;
        if documents.is_empty() {
            return Err(CrudError::not_found(format!("No {} found with {}", self.options.alias, conditions)));
        }
        documents.into_iter().map(|document| self.decode(document)).collect()
    }

    /// Insert `object` and any cascade-insert relations in one transaction.
    pub async fn create(&self, object: &impl Serialize, mut validate: ValidateOptions<'_, E, C, T>) -> Result<E, CrudError> {
        if validate.has_role_validator == Some(true) {
            if self.hooks.fetch_for_validation.is_none() {
                return Err(CrudError::Configuration(format!(
                    "Role validation on create of {} needs a fetch-for-validation hook",
                    self.options.alias
                )));
            }
            let probe = validate.find_one_before_create.take();
            self.authorize(None, validate).await?;
            validate = ValidateOptions { find_one_before_create: probe, ..ValidateOptions::default() };
        }

        if let Some(probe) = &validate.find_one_before_create {
            if self.find_one_with(probe, &FindOptions::default()).await?.is_some() {
                return Err(CrudError::conflict(format!("The {} having {} already exists", self.options.alias, probe)));
            }
        }

        let mut values = self.encode(object)?;
        let mut cascades = vec![];
        for relation in self.metadata.schema.relations.iter().filter(|relation| relation.cascade_insert) {
            let children = values.remove(relation.property).or_else(|| values.remove(&snake(relation.property)));
            if let Some(Value::Array(children)) = children {
                cascades.push((relation, children));
            }
        }

        let writer = RecordWriter::new(&self.metadata, &self.options.alias);
        let insert = writer.insert(&values)?;

        let mut tx = self.pool.begin().await.map_err(|e| self.store_error(e))?;
        let mut document = returned_row(&mut tx, &insert).await.map_err(|e| self.store_error(e))?;

        for (relation, children) in cascades {
            let target = EntityMetadata::for_schema((relation.target)())?;
            let child_writer = RecordWriter::new(&target, relation.property);
            let parent_key = document.get(relation.local_column).cloned().unwrap_or(Value::Null);
            let mut inserted = vec![];
            for child in children {
                let Value::Object(mut child) = child else { continue };
                child.insert(relation.foreign_column.to_string(), parent_key.clone());
                let sql = child_writer.insert(&child)?;
                let mut row = returned_row(&mut tx, &sql).await.map_err(|e| self.store_error(e))?;
                normalize_row(&target, &mut row);
                inserted.push(Value::Object(row));
            }
            document.insert(snake(relation.property), Value::Array(inserted));
        }
        tx.commit().await.map_err(|e| self.store_error(e))?;

        normalize_row(&self.metadata, &mut document);
        tracing::debug!("Created {}", self.options.alias);
        self.decode(Value::Object(document))
    }

    /// Apply the recognized fields of `patch`; the save is skipped when nothing changed.
    pub async fn update_one_by_conditions(
        &self,
        patch: &impl Serialize,
        conditions: &Conditions,
        find: &FindOptions,
        validate: ValidateOptions<'_, E, C, T>,
    ) -> Result<E, CrudError> {
        let current = self.find_one_by_conditions(conditions, find).await?;
        self.authorize(Some(&current), validate).await?;
        self.apply_patch(current, patch).await
    }

    /// Save `patch` onto an already loaded entity.
    pub async fn apply_patch(&self, current: E, patch: &impl Serialize) -> Result<E, CrudError> {
        let stored = self.encode(&current)?;
        let patch = self.encode(patch)?;
        let writer = RecordWriter::new(&self.metadata, &self.options.alias);
        let changes = writer.changes(&stored, &patch);
        if changes.is_empty() {
            return Ok(current);
        }

        let sql = writer.update(&stored, &changes)?;
        let mut conn = self.pool.acquire().await.map_err(|e| self.store_error(e))?;
        let row = returned_row(&mut conn, &sql).await.map_err(|e| self.store_error(e))?;
        self.decode(Value::Object(merge_saved(&self.metadata, stored, row)))
    }

    /// Apply several patches atomically, e.g. swapping two roles.
    pub async fn apply_patches(&self, updates: Vec<(E, Map<String, Value>)>) -> Result<Vec<E>, CrudError> {
        let writer = RecordWriter::new(&self.metadata, &self.options.alias);
        let mut tx = self.pool.begin().await.map_err(|e| self.store_error(e))?;
        let mut saved = vec![];
        for (current, patch) in updates {
            let stored = self.encode(&current)?;
            let changes = writer.changes(&stored, &patch);
            if changes.is_empty() {
                saved.push(current);
                continue;
            }
            let sql = writer.update(&stored, &changes)?;
            let row = returned_row(&mut tx, &sql).await.map_err(|e| self.store_error(e))?;
            saved.push(self.decode(Value::Object(merge_saved(&self.metadata, stored, row)))?);
        }
        tx.commit().await.map_err(|e| self.store_error(e))?;
        Ok(saved)
    }

    /// Load, authorize, then hard delete or stamp `deleted_at`.
    pub async fn delete_one_by_conditions(
        &self,
        conditions: &Conditions,
        find: &FindOptions,
        validate: ValidateOptions<'_, E, C, T>,
        delete: DeleteOptions,
    ) -> Result<(), CrudError> {
        let current = self.find_one_by_conditions(conditions, find).await?;
        self.authorize(Some(&current), validate).await?;

        let stored = self.encode(&current)?;
        let sql = RecordWriter::new(&self.metadata, &self.options.alias).delete(&stored, delete.soft_delete)?;
        let affected = DatabaseManager::execute(&self.pool, &sql).await.map_err(|e| self.store_error(e))?;
        tracing::debug!("Deleted {} {} (soft: {})", affected, self.options.alias, delete.soft_delete);
        Ok(())
    }

    /// Flat joined read without the pagination envelope.
    pub async fn get_many(&self, params: &QueryParams, extensions: &[QueryExtension]) -> Result<Vec<E>, CrudError> {
        let build = BuildOptions::default();
        let mut built = self.builder(&self.options.relations).build(params, extensions, &build)?;
        built.count = None;
        let (documents, _) = self.execute(&built).await?;
        documents.into_iter().map(|document| self.decode(document)).collect()
    }

    /// Flat joined read: LIMIT/OFFSET apply to joined rows.
    pub async fn get_many_with_meta(&self, params: &QueryParams, extensions: &[QueryExtension]) -> Result<WithMeta<E>, CrudError> {
        let built = self.builder(&self.options.relations).build(params, extensions, &BuildOptions::default())?;
        self.with_meta(&built).await
    }

    /// Paginates root rows in a subquery so every page holds `limit` distinct roots.
    pub async fn get_many_by_relations_with_meta(
        &self,
        params: &QueryParams,
        extensions: &[QueryExtension],
        pagination: &RootPagination,
    ) -> Result<WithMeta<E>, CrudError> {
        let build = BuildOptions {
            mode: PageMode::RootScoped {
                native_offset: pagination.native_offset,
                count_with_extensions: pagination.count_with_extensions,
            },
            exclude: pagination.exclude.clone(),
            ..Default::default()
        };
        let built = self.builder(&self.options.relations).build(params, extensions, &build)?;
        self.with_meta(&built).await
    }

    /// Single entity through the full engine: relations, filters and extensions.
    pub async fn find_one_by_params_with_default_relations(
        &self,
        params: &QueryParams,
        extensions: &[QueryExtension],
        exclude: &[String],
    ) -> Result<E, CrudError> {
        let build = BuildOptions { mode: PageMode::Unpaged, exclude: exclude.to_vec(), ..Default::default() };
        let built = self.builder(&self.options.relations).build(params, extensions, &build)?;
        let (documents, _) = self.execute(&built).await?;
        match documents.into_iter().next() {
            Some(document) => self.decode(document),
            None => {
                let described: Vec<String> =
                    params.filters().map(|(key, value)| format!("{}: {}", key, value.candidates().join(","))).collect();
                Err(CrudError::not_found(format!("No {} found with {}", self.options.alias, described.join(", "))))
            }
        }
    }

    async fn with_meta(&self, built: &BuiltQuery) -> Result<WithMeta<E>, CrudError> {
        let (documents, total) = self.execute(built).await?;
        let data = documents.into_iter().map(|document| self.decode(document)).collect::<Result<Vec<_>, _>>()?;
        Ok(WithMeta::new(data, built.pagination, total.unwrap_or(0)))
    }
}

async fn count_pool(pool: &PgPool, sql: &SqlResult) -> Result<i64, sqlx::Error> {
    let rows = DatabaseManager::fetch_all(pool, sql).await?;
    rows.first().map(|row| row.try_get::<i64, _>("count")).transpose().map(|count| count.unwrap_or(0))
}

async fn count_rows(conn: &mut PgConnection, sql: &SqlResult) -> Result<i64, sqlx::Error> {
    let rows = DatabaseManager::fetch_all(conn, sql).await?;
    rows.first().map(|row| row.try_get::<i64, _>("count")).transpose().map(|count| count.unwrap_or(0))
}

async fn returned_row(conn: &mut PgConnection, sql: &SqlResult) -> Result<Map<String, Value>, sqlx::Error> {
    let row = DatabaseManager::fetch_optional(conn, sql).await?.ok_or(sqlx::Error::RowNotFound)?;
    match row.try_get::<Value, _>(RETURNING_COLUMN)? {
        Value::Object(map) => Ok(map),
        _ => Err(sqlx::Error::RowNotFound),
    }
}

/// Saved columns over the previously loaded document, keeping its relation keys.
fn merge_saved(metadata: &EntityMetadata, mut stored: Map<String, Value>, mut saved: Map<String, Value>) -> Map<String, Value> {
    normalize_row(metadata, &mut saved);
    stored.extend(saved);
    stored
}

fn snake(property: &str) -> String {
    property.to_case(Case::Snake)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
