use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid identifier '{0}': expected 32 hex characters")]
    InvalidId(String),

    #[error("Message schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("Message is missing field '{field}' required by schema {schema}")]
    MissingField { schema: String, field: String },

    #[error("Field '{field}' does not match the type declared by schema {schema}")]
    FieldType { schema: String, field: String },

    #[error("Schema {schema} already declares field '{field}'")]
    DuplicateField { schema: String, field: String },

    #[error("Default value for field '{field}' does not match its declared type in schema {schema}")]
    DefaultType { schema: String, field: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
