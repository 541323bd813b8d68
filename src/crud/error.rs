use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::postgres::PgDatabaseError;
use thiserror::Error;

use crate::database::metadata::MetadataError;
use crate::database::DatabaseError;
use crate::filter::FilterError;

/// Stable classification of [`CrudError`], independent of message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    Forbidden,
    BusinessRule,
    Configuration,
    Database,
}

#[derive(Debug, Error)]
pub enum CrudError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    /// Raised by post-validation hooks
    #[error("{0}")]
    BusinessRule(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl CrudError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrudError::BadRequest(_) => ErrorKind::BadRequest,
            CrudError::NotFound(_) => ErrorKind::NotFound,
            CrudError::Conflict(_) => ErrorKind::Conflict,
            CrudError::Forbidden(_) => ErrorKind::Forbidden,
            CrudError::BusinessRule(_) => ErrorKind::BusinessRule,
            CrudError::Configuration(_) => ErrorKind::Configuration,
            CrudError::Database(_) => ErrorKind::Database,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        CrudError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        CrudError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        CrudError::Conflict(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        CrudError::Forbidden(message.into())
    }

    pub fn business_rule(message: impl Into<String>) -> Self {
        CrudError::BusinessRule(message.into())
    }

    /// Translate a store error raised while working on `alias`.
    ///
    /// Recognized constraint and input errors become client errors; everything
    /// else is passed through as [`CrudError::Database`].
    pub fn from_store(alias: &str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if let Some(code) = db_err.code() {
                let detail = db_err.try_downcast_ref::<PgDatabaseError>().and_then(|pg| pg.detail());
                if let Some(translated) = translate_store_error(alias, &code, detail) {
                    return translated;
                }
            }
        }
        CrudError::Database(DatabaseError::Sqlx(err))
    }
}

impl From<FilterError> for CrudError {
    fn from(err: FilterError) -> Self {
        CrudError::BadRequest(err.to_string())
    }
}

impl From<MetadataError> for CrudError {
    fn from(err: MetadataError) -> Self {
        CrudError::Configuration(err.to_string())
    }
}

/// Map a SQLSTATE code (and its detail text) to a client-facing error.
pub fn translate_store_error(alias: &str, code: &str, detail: Option<&str>) -> Option<CrudError> {
    match code {
        // undefined_column, invalid_text_representation, invalid_datetime_format, datetime_field_overflow
        "42703" | "22P02" | "22007" | "22008" => Some(CrudError::bad_request("Invalid query parameters")),
        "23505" => {
            let pairs = detail.and_then(key_pairs).unwrap_or_default();
            Some(CrudError::conflict(format!("The {} having {} already exists", alias, describe_pairs(&pairs))))
        }
        "23503" => {
            let pairs = detail.and_then(key_pairs).unwrap_or_default();
            Some(CrudError::not_found(format!("The {} not found", describe_pairs(&pairs))))
        }
        _ => None,
    }
}

static KEY_DETAIL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\(([^)]*)\)=\(([^)]*)\)").ok());

/// `Key (project_id, username)=(p1, bob) already exists.` -> `[(project_id, p1), (username, bob)]`
fn key_pairs(detail: &str) -> Option<Vec<(String, String)>> {
    let captures = KEY_DETAIL.as_ref()?.captures(detail)?;
    let names = captures.get(1)?.as_str().split(',').map(|s| s.trim().trim_matches('"').to_string());
    let values = captures.get(2)?.as_str().split(',').map(|s| s.trim().to_string());
    Some(names.zip(values).collect())
}

fn describe_pairs(pairs: &[(String, String)]) -> String {
    let parts: Vec<String> = pairs.iter().map(|(name, value)| format!("{}: {}", name, value)).collect();
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_lists_the_conflicting_key() {
        let err = translate_store_error("members", "23505", Some("Key (project_id, username)=(p1, bob) already exists.")).unwrap();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "The members having project_id: p1, username: bob already exists");
    }

    #[test]
    fn foreign_key_violation_is_not_found() {
        let detail = "Key (username)=(ghost) is not present in table \"profile\".";
        let err = translate_store_error("members", "23503", Some(detail)).unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "The username: ghost not found");
    }

    #[test]
    fn invalid_input_is_bad_request() {
        for code in ["42703", "22P02", "22007", "22008"] {
            assert_eq!(translate_store_error("profile", code, None).unwrap().kind(), ErrorKind::BadRequest);
        }
        assert!(translate_store_error("profile", "40001", None).is_none());
    }

    #[test]
    fn unclassified_errors_pass_through() {
        let err = CrudError::from_store("profile", sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::Database);
    }

    #[test]
    fn filter_errors_become_bad_requests() {
        let err: CrudError = FilterError::invalid_value("yearBorn", "Query for yearBorn must be a numeric type or an array of number").into();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.to_string(), "Query for yearBorn must be a numeric type or an array of number");
    }
}
