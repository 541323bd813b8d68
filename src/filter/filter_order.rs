use super::error::FilterError;
use super::types::{qualified, SortDirection, SortSpec};
use crate::database::metadata::{EntityMetadata, FieldKind};

pub struct FilterOrder;

impl FilterOrder {
    /// Single ORDER BY term for `alias`. Defaults to creation time ascending, or the
    /// first key column when the entity has no `created_at`.
    pub fn generate(alias: &str, metadata: &EntityMetadata, sort: Option<&SortSpec>) -> Result<String, FilterError> {
        let (column, direction) = match sort {
            Some(spec) => {
                let field = metadata
                    .field(&spec.field)
                    .filter(|f| f.kind != FieldKind::FullText)
                    .ok_or_else(|| FilterError::InvalidColumn(spec.field.clone()))?;
                (field.column, spec.direction)
            }
            None => {
                let column = metadata
                    .created_at_column()
                    .or_else(|| metadata.primary_key().first().copied())
                    .ok_or_else(|| FilterError::InvalidColumn(metadata.schema.name.to_string()))?;
                (column, SortDirection::Asc)
            }
        };
        Ok(format!("{} {}", qualified(alias, column), direction.to_sql()))
    }
}
