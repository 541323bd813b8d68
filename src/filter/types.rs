use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const SORT_KEY: &str = "sort";
pub const LIMIT_KEY: &str = "limit";
pub const PAGE_KEY: &str = "page";
pub const SEARCH_KEY: &str = "search";

/// Query string keys that never act as field filters.
pub const RESERVED_KEYS: [&str; 4] = [SORT_KEY, LIMIT_KEY, PAGE_KEY, SEARCH_KEY];

/// Value of a single filter term: `?major=it` or `?major=it&major=design` / `?major[]=it`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Single(String),
    Many(Vec<String>),
}

impl FilterValue {
    pub fn candidates(&self) -> Vec<&str> {
        match self {
            FilterValue::Single(v) => vec![v.as_str()],
            FilterValue::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FilterValue::Many(values) if values.is_empty())
    }

    pub(crate) fn push(&mut self, value: String) {
        match self {
            FilterValue::Single(existing) => {
                *self = FilterValue::Many(vec![std::mem::take(existing), value]);
            }
            FilterValue::Many(values) => values.push(value),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Single(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Single(value)
    }
}

impl<S: Into<String>> From<Vec<S>> for FilterValue {
    fn from(values: Vec<S>) -> Self {
        FilterValue::Many(values.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// One sort key, parsed from `field` or `-field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Normalized page window. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Pagination {
    /// Saturates instead of overflowing on absurd page numbers.
    pub fn offset(&self) -> i64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

/// Typed bind parameter. Placeholders carry the cast, so `Null` binds as untyped text.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Json(Value),
    TextArray(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<SqlParam>,
}

/// Quote an identifier for interpolation into generated SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"alias"."column"`
pub fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", quote_ident(alias), quote_ident(column))
}
