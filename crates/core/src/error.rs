use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaidxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

/// Problems found while loading an extraction schema file.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("schema is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("schema must declare at least one field")]
    Empty,

    #[error("duplicate field name '{0}'")]
    DuplicateField(String),

    #[error("field '{field}' has unknown type tag '{tag}'")]
    UnknownType { field: String, tag: String },

    #[error("malformed schema: {0}")]
    Malformed(String),
}

/// Invalid resolved configuration values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{key} must be at least {min}, got {value}")]
    TooSmall { key: &'static str, min: u64, value: u64 },

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// The external document parser could not produce content for a file.
#[derive(Error, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[error("failed to parse document '{document_id}': {message}")]
pub struct DocumentParseError {
    pub document_id: String,
    pub message: String,
}
