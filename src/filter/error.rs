use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Unknown alias: {0}")]
    UnknownAlias(String),

    #[error("Unknown relation: {0}")]
    UnknownRelation(String),

    #[error("{message}")]
    InvalidValue { field: String, message: String },
}

impl FilterError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        FilterError::InvalidValue { field: field.into(), message: message.into() }
    }
}
