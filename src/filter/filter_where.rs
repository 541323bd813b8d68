use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::error::FilterError;
use super::types::{qualified, quote_ident, FilterValue, SqlParam};
use crate::database::metadata::{EntityMetadata, FieldKind, FieldMeta};
use crate::database::query_builder::{FieldRef, Predicate};

/// Aliases visible to a predicate, innermost last.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    aliases: Vec<(String, Arc<EntityMetadata>)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, alias: impl Into<String>, metadata: Arc<EntityMetadata>) -> Self {
        self.push(alias, metadata);
        self
    }

    pub fn push(&mut self, alias: impl Into<String>, metadata: Arc<EntityMetadata>) {
        self.aliases.push((alias.into(), metadata));
    }

    pub fn get(&self, alias: &str) -> Option<&Arc<EntityMetadata>> {
        self.aliases.iter().rev().find(|(name, _)| name == alias).map(|(_, metadata)| metadata)
    }

    fn resolve(&self, field: &FieldRef) -> Result<FieldMeta, FilterError> {
        let metadata = self.get(&field.alias).ok_or_else(|| FilterError::UnknownAlias(field.alias.clone()))?;
        metadata
            .field(&field.field)
            .copied()
            .ok_or_else(|| FilterError::InvalidColumn(format!("{}.{}", field.alias, field.field)))
    }
}

/// Accumulates `$n` parameters while rendering WHERE fragments.
#[derive(Debug, Default)]
pub struct FilterWhere {
    param_values: Vec<SqlParam>,
}

impl FilterWhere {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.param_values
    }

    pub fn param(&mut self, value: SqlParam) -> String {
        self.param_values.push(value);
        format!("${}", self.param_values.len())
    }

    /// `"alias"."deleted_at" IS NULL` for soft-deletable entities.
    pub fn not_deleted(alias: &str, metadata: &EntityMetadata) -> Option<String> {
        metadata.soft_delete_column().map(|column| format!("{} IS NULL", qualified(alias, column)))
    }

    /// One query-string filter term. `None` when the term does not constrain anything.
    pub fn filter_term(&mut self, alias: &str, field: &FieldMeta, value: &FilterValue) -> Result<Option<String>, FilterError> {
        let candidates = value.candidates();
        if candidates.is_empty() {
            return Ok(None);
        }

        let column = qualified(alias, field.column);
        let predicates: Vec<String> = match field.kind {
            FieldKind::Jsonb | FieldKind::FullText => return Ok(None),
            FieldKind::Array => {
                let lowered = candidates.iter().map(|c| c.to_lowercase()).collect();
                let placeholder = self.param(SqlParam::TextArray(lowered));
                return Ok(Some(format!("lower({}::text)::text[] && {}::text[]", column, placeholder)));
            }
            FieldKind::Uuid => candidates
                .iter()
                .map(|c| {
                    let id = Uuid::parse_str(c.trim()).map_err(|_| {
                        FilterError::invalid_value(field.property, format!("Query for {} must be a valid uuid", field.property))
                    })?;
                    Ok(format!("{} = {}", column, self.param(SqlParam::Uuid(id))))
                })
                .collect::<Result<_, FilterError>>()?,
            FieldKind::Number => candidates
                .iter()
                .map(|c| {
                    let param = parse_number(c).ok_or_else(|| {
                        FilterError::invalid_value(
                            field.property,
                            format!("Query for {} must be a numeric type or an array of number", field.property),
                        )
                    })?;
                    Ok(format!("{} = {}", column, self.param(param)))
                })
                .collect::<Result<_, FilterError>>()?,
            FieldKind::Date | FieldKind::Timestamp => candidates
                .iter()
                .map(|c| {
                    if !is_date_like(c) {
                        return Err(FilterError::invalid_value(field.property, format!("Query for {} must be a date", field.property)));
                    }
                    Ok(format!("{}::date = {}::date", column, self.param(SqlParam::Text(c.trim().to_string()))))
                })
                .collect::<Result<_, FilterError>>()?,
            FieldKind::SimpleArray => candidates
                .iter()
                .map(|c| format!("{} ILIKE {}", column, self.param(SqlParam::Text(format!("%{}%", c)))))
                .collect(),
            FieldKind::Text => candidates
                .iter()
                .map(|c| format!("{} ILIKE {}", column, self.param(SqlParam::Text(c.to_string()))))
                .collect(),
        };

        Ok(Some(any_of(predicates)))
    }

    /// Render a predicate tree against the aliases in `scope`.
    pub fn predicate(&mut self, scope: &Scope, predicate: &Predicate) -> Result<String, FilterError> {
        match predicate {
            Predicate::Eq(field, value) | Predicate::Ne(field, value) => {
                let meta = scope.resolve(field)?;
                let column = qualified(&field.alias, meta.column);
                let negated = matches!(predicate, Predicate::Ne(..));
                if value.is_null() {
                    return Ok(format!("{} IS {}NULL", column, if negated { "NOT " } else { "" }));
                }
                let placeholder = self.bind_value(&meta, value)?;
                Ok(format!("{} {} {}", column, if negated { "<>" } else { "=" }, placeholder))
            }
            Predicate::In(field, values) => {
                if values.is_empty() {
                    return Ok("1=0".to_string());
                }
                let meta = scope.resolve(field)?;
                let column = qualified(&field.alias, meta.column);
                let placeholders = values
                    .iter()
                    .map(|v| self.bind_value(&meta, v))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("{} IN ({})", column, placeholders.join(", ")))
            }
            Predicate::IsNull(field) => {
                let meta = scope.resolve(field)?;
                Ok(format!("{} IS NULL", qualified(&field.alias, meta.column)))
            }
            Predicate::And(items) | Predicate::Or(items) => {
                if items.is_empty() {
                    return Ok(if matches!(predicate, Predicate::And(_)) { "1=1" } else { "1=0" }.to_string());
                }
                let joiner = if matches!(predicate, Predicate::And(_)) { " AND " } else { " OR " };
                let parts = items
                    .iter()
                    .map(|item| self.predicate(scope, item).map(|sql| format!("({})", sql)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(parts.join(joiner))
            }
            Predicate::Exists { schema, alias, predicate } => {
                let metadata = EntityMetadata::for_schema(*schema).map_err(|e| FilterError::UnknownRelation(e.to_string()))?;
                let inner_scope = scope.clone().with(alias.clone(), metadata.clone());
                let mut conditions = vec![];
                if let Some(live) = Self::not_deleted(alias, &metadata) {
                    conditions.push(live);
                }
                conditions.push(format!("({})", self.predicate(&inner_scope, predicate)?));
                Ok(format!(
                    "EXISTS (SELECT 1 FROM {} AS {} WHERE {})",
                    quote_ident(schema.table),
                    quote_ident(alias),
                    conditions.join(" AND ")
                ))
            }
        }
    }

    /// Bind a JSON value for `field`, returning the placeholder with the cast its column needs.
    pub fn bind_value(&mut self, field: &FieldMeta, value: &Value) -> Result<String, FilterError> {
        let invalid = || FilterError::invalid_value(field.property, format!("Invalid value for {}", field.property));
        let (param, cast) = match (field.kind, value) {
            (FieldKind::FullText, _) => return Err(invalid()),
            (kind, Value::Null) => (SqlParam::Null, cast_for(kind)),
            (FieldKind::Uuid, Value::String(s)) => (SqlParam::Uuid(Uuid::parse_str(s).map_err(|_| invalid())?), ""),
            (FieldKind::Uuid, _) => return Err(invalid()),
            (FieldKind::Number, Value::Number(n)) => {
                let param = match n.as_i64() {
                    Some(i) => SqlParam::Int(i),
                    None => SqlParam::Float(n.as_f64().ok_or_else(invalid)?),
                };
                (param, "::numeric")
            }
            (FieldKind::Number, Value::String(s)) => (parse_number(s).ok_or_else(invalid)?, "::numeric"),
            (FieldKind::Number, _) => return Err(invalid()),
            (FieldKind::Date, Value::String(s)) => (SqlParam::Text(s.clone()), "::date"),
            (FieldKind::Timestamp, Value::String(s)) => (SqlParam::Text(s.clone()), "::timestamptz"),
            (FieldKind::Date | FieldKind::Timestamp, _) => return Err(invalid()),
            (FieldKind::Array, Value::Array(items)) => (SqlParam::TextArray(items.iter().map(text_of).collect()), "::text[]"),
            (FieldKind::Array, other) => (SqlParam::TextArray(vec![text_of(other)]), "::text[]"),
            (FieldKind::SimpleArray, Value::Array(items)) => {
                (SqlParam::Text(items.iter().map(text_of).collect::<Vec<_>>().join(",")), "")
            }
            (FieldKind::Jsonb, other) => (SqlParam::Json(other.clone()), "::jsonb"),
            (FieldKind::Text | FieldKind::SimpleArray, other) => (SqlParam::Text(text_of(other)), ""),
        };
        Ok(format!("{}{}", self.param(param), cast))
    }
}

fn cast_for(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Uuid => "::uuid",
        FieldKind::Number => "::numeric",
        FieldKind::Date => "::date",
        FieldKind::Timestamp => "::timestamptz",
        FieldKind::Array => "::text[]",
        FieldKind::Jsonb => "::jsonb",
        FieldKind::Text | FieldKind::SimpleArray | FieldKind::FullText => "",
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_number(raw: &str) -> Option<SqlParam> {
    let trimmed = raw.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(SqlParam::Int(i));
    }
    trimmed.parse::<f64>().ok().filter(|f| f.is_finite()).map(SqlParam::Float)
}

fn is_date_like(raw: &str) -> bool {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(trimmed).is_ok()
}

fn any_of(mut predicates: Vec<String>) -> String {
    if predicates.len() == 1 {
        return predicates.remove(0);
    }
    format!("({})", predicates.join(" OR "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::metadata::{ColumnDef, EntitySchema};
    use serde_json::json;

    static MEMBER: EntitySchema = EntitySchema {
        name: "member",
        table: "member",
        primary_key: &["id"],
        columns: &[
            ColumnDef::new("id", "id", FieldKind::Uuid),
            ColumnDef::new("role", "role", FieldKind::Text),
            ColumnDef::new("age", "age", FieldKind::Number),
            ColumnDef::new("major", "major", FieldKind::Array),
            ColumnDef::new("expertises", "expertises", FieldKind::SimpleArray),
            ColumnDef::new("joinedAt", "joined_at", FieldKind::Timestamp),
            ColumnDef::new("profile", "profile", FieldKind::Jsonb),
            ColumnDef::new("deletedAt", "deleted_at", FieldKind::Timestamp),
        ],
        relations: &[],
    };

    fn field(name: &str) -> FieldMeta {
        *EntityMetadata::for_schema(&MEMBER).unwrap().field(name).unwrap()
    }

    #[test]
    fn text_matches_case_insensitively() {
        let mut fw = FilterWhere::new();
        let sql = fw.filter_term("m", &field("role"), &FilterValue::from("owner")).unwrap();
        assert_eq!(sql.as_deref(), Some("\"m\".\"role\" ILIKE $1"));
        assert_eq!(fw.into_params(), vec![SqlParam::Text("owner".into())]);
    }

    #[test]
    fn list_values_are_ored() {
        let mut fw = FilterWhere::new();
        let sql = fw.filter_term("m", &field("expertises"), &FilterValue::from(vec!["it", "design"])).unwrap();
        assert_eq!(sql.as_deref(), Some("(\"m\".\"expertises\" ILIKE $1 OR \"m\".\"expertises\" ILIKE $2)"));
        assert_eq!(fw.into_params(), vec![SqlParam::Text("%it%".into()), SqlParam::Text("%design%".into())]);
    }

    #[test]
    fn array_columns_use_lowercase_overlap() {
        let mut fw = FilterWhere::new();
        let sql = fw.filter_term("m", &field("major"), &FilterValue::from(vec!["CS", "Design"])).unwrap();
        assert_eq!(sql.as_deref(), Some("lower(\"m\".\"major\"::text)::text[] && $1::text[]"));
        assert_eq!(fw.into_params(), vec![SqlParam::TextArray(vec!["cs".into(), "design".into()])]);
    }

    #[test]
    fn empty_list_and_jsonb_are_skipped() {
        let mut fw = FilterWhere::new();
        assert!(fw.filter_term("m", &field("role"), &FilterValue::Many(vec![])).unwrap().is_none());
        assert!(fw.filter_term("m", &field("profile"), &FilterValue::from("x")).unwrap().is_none());
        assert!(fw.into_params().is_empty());
    }

    #[test]
    fn numbers_and_uuids_use_equality() {
        let mut fw = FilterWhere::new();
        let sql = fw.filter_term("m", &field("age"), &FilterValue::from("42")).unwrap();
        assert_eq!(sql.as_deref(), Some("\"m\".\"age\" = $1"));
        assert!(fw.filter_term("m", &field("age"), &FilterValue::from("forty")).is_err());
        assert!(fw.filter_term("m", &field("id"), &FilterValue::from("not-a-uuid")).is_err());
    }

    #[test]
    fn dates_compare_by_calendar_day() {
        let mut fw = FilterWhere::new();
        let sql = fw.filter_term("m", &field("joinedAt"), &FilterValue::from("2024-03-01")).unwrap();
        assert_eq!(sql.as_deref(), Some("\"m\".\"joined_at\"::date = $1::date"));
        assert!(fw.filter_term("m", &field("joinedAt"), &FilterValue::from("yesterday")).is_err());
    }

    #[test]
    fn predicates_render_with_scope() {
        let metadata = EntityMetadata::for_schema(&MEMBER).unwrap();
        let scope = Scope::new().with("members", metadata);
        let mut fw = FilterWhere::new();
        let predicate = Predicate::or(vec![
            FieldRef::new("members", "role").equals(json!("OWNER")),
            FieldRef::new("members", "role").is_in(vec![json!("MEMBER"), json!("INVITED")]),
        ]);
        let sql = fw.predicate(&scope, &predicate).unwrap();
        assert_eq!(sql, "(\"members\".\"role\" = $1) OR (\"members\".\"role\" IN ($2, $3))");
        assert!(fw.predicate(&scope, &FieldRef::new("other", "role").equals(json!("x"))).is_err());
    }

    #[test]
    fn exists_opens_a_nested_scope() {
        let metadata = EntityMetadata::for_schema(&MEMBER).unwrap();
        let scope = Scope::new().with("members", metadata);
        let mut fw = FilterWhere::new();
        let predicate = Predicate::exists(
            &MEMBER,
            "me",
            Predicate::and(vec![FieldRef::new("me", "role").equals(json!("OWNER")), FieldRef::new("members", "deletedAt").is_null()]),
        );
        let sql = fw.predicate(&scope, &predicate).unwrap();
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"member\" AS \"me\" WHERE \"me\".\"deleted_at\" IS NULL AND ((\"me\".\"role\" = $1) AND (\"members\".\"deleted_at\" IS NULL)))"
        );
    }

    #[test]
    fn bound_values_carry_casts() {
        let mut fw = FilterWhere::new();
        assert_eq!(fw.bind_value(&field("age"), &json!(3)).unwrap(), "$1::numeric");
        assert_eq!(fw.bind_value(&field("id"), &Value::Null).unwrap(), "$2::uuid");
        assert_eq!(fw.bind_value(&field("expertises"), &json!(["a", "b"])).unwrap(), "$3");
        let params = fw.into_params();
        assert_eq!(params[2], SqlParam::Text("a,b".into()));
    }
}
