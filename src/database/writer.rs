use serde_json::{Map, Value};

use crate::database::metadata::{EntityMetadata, FieldKind, FieldMeta};
use crate::filter::filter_where::FilterWhere;
use crate::filter::types::{quote_ident, SqlResult};
use crate::filter::FilterError;

/// Column every write statement returns; the stored row as JSON.
pub const RETURNING_COLUMN: &str = "row";

const SYSTEM_COLUMNS: [&str; 3] = ["created_at", "updated_at", "deleted_at"];

/// INSERT/UPDATE/DELETE statements for one entity table.
pub struct RecordWriter<'a> {
    metadata: &'a EntityMetadata,
    alias: &'a str,
}

impl<'a> RecordWriter<'a> {
    pub fn new(metadata: &'a EntityMetadata, alias: &'a str) -> Self {
        Self { metadata, alias }
    }

    /// Insert the known, non-null fields of `values`. Keys may be properties or columns.
    pub fn insert(&self, values: &Map<String, Value>) -> Result<SqlResult, FilterError> {
        let mut fw = FilterWhere::new();
        let mut columns = vec![];
        let mut placeholders = vec![];

        for (key, value) in values {
            let Some(field) = self.writable(key) else { continue };
            if value.is_null() || columns.contains(&quote_ident(field.column)) {
                continue;
            }
            placeholders.push(fw.bind_value(&field, value)?);
            columns.push(quote_ident(field.column));
        }

        let table = format!("{} AS {}", quote_ident(self.metadata.schema.table), quote_ident(self.alias));
        let query = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES{}", table, self.returning())
        } else {
            format!("INSERT INTO {} ({}) VALUES ({}){}", table, columns.join(", "), placeholders.join(", "), self.returning())
        };
        Ok(SqlResult { query, params: fw.into_params() })
    }

    /// Fields of `patch` whose value differs from the stored `current` row.
    ///
    /// Key columns, system timestamps, search vectors and unknown keys are never changed.
    pub fn changes(&self, current: &Map<String, Value>, patch: &Map<String, Value>) -> Vec<(FieldMeta, Value)> {
        let mut changes: Vec<(FieldMeta, Value)> = vec![];
        for (key, value) in patch {
            let Some(field) = self.writable(key) else { continue };
            if self.metadata.primary_key().contains(&field.column) || SYSTEM_COLUMNS.contains(&field.column) {
                continue;
            }
            if current.get(field.column).unwrap_or(&Value::Null) == value {
                continue;
            }
            match changes.iter_mut().find(|(existing, _)| existing.column == field.column) {
                Some(slot) => slot.1 = value.clone(),
                None => changes.push((field, value.clone())),
            }
        }
        changes
    }

    /// Update the row identified by the key columns of `current`.
    pub fn update(&self, current: &Map<String, Value>, changes: &[(FieldMeta, Value)]) -> Result<SqlResult, FilterError> {
        let mut fw = FilterWhere::new();
        let mut assignments = vec![];
        for (field, value) in changes {
            assignments.push(format!("{} = {}", quote_ident(field.column), fw.bind_value(field, value)?));
        }
        if let Some(column) = self.metadata.updated_at_column() {
            assignments.push(format!("{} = now()", quote_ident(column)));
        }
        if assignments.is_empty() {
            return Err(FilterError::invalid_value(self.metadata.schema.name, "Nothing to update"));
        }

        let key = self.key_clause(&mut fw, current)?;
        let query = format!(
            "UPDATE {} AS {} SET {} WHERE {}{}",
            quote_ident(self.metadata.schema.table),
            quote_ident(self.alias),
            assignments.join(", "),
            key,
            self.returning()
        );
        Ok(SqlResult { query, params: fw.into_params() })
    }

    /// Delete the row identified by `current`. Soft deletes stamp `deleted_at` instead.
    pub fn delete(&self, current: &Map<String, Value>, soft: bool) -> Result<SqlResult, FilterError> {
        let mut fw = FilterWhere::new();
        let key = self.key_clause(&mut fw, current)?;
        let table = quote_ident(self.metadata.schema.table);
        let alias = quote_ident(self.alias);

        let query = if soft {
            let column = self
                .metadata
                .soft_delete_column()
                .ok_or_else(|| FilterError::InvalidColumn(format!("{}.deleted_at", self.metadata.schema.name)))?;
            format!("UPDATE {} AS {} SET {} = now() WHERE {}{}", table, alias, quote_ident(column), key, self.returning())
        } else {
            format!("DELETE FROM {} AS {} WHERE {}{}", table, alias, key, self.returning())
        };
        Ok(SqlResult { query, params: fw.into_params() })
    }

    fn writable(&self, key: &str) -> Option<FieldMeta> {
        self.metadata.field(key).copied().filter(|field| field.kind != FieldKind::FullText)
    }

    fn key_clause(&self, fw: &mut FilterWhere, current: &Map<String, Value>) -> Result<String, FilterError> {
        let mut terms = vec![];
        for column in self.metadata.primary_key() {
            let field = self.metadata.field(column).copied().ok_or_else(|| FilterError::InvalidColumn(column.to_string()))?;
            let value = current
                .get(*column)
                .filter(|value| !value.is_null())
                .ok_or_else(|| FilterError::invalid_value(*column, format!("Missing key column {}", column)))?;
            terms.push(format!("{}.{} = {}", quote_ident(self.alias), quote_ident(column), fw.bind_value(&field, value)?));
        }
        Ok(terms.join(" AND "))
    }

    fn returning(&self) -> String {
        format!(" RETURNING to_jsonb({}) AS {}", quote_ident(self.alias), quote_ident(RETURNING_COLUMN))
    }
}
