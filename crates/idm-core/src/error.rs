//! Error types for the IDM directory layer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdmError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid record: {message}")]
    InvalidRecord { message: String },

    #[error("Backend {backend} is read-only")]
    ReadOnly { backend: String },

    #[error("Unsupported operator: {operator}")]
    UnsupportedOperator { operator: String },

    #[error("Unsupported attribute: {attribute}")]
    UnsupportedAttribute { attribute: String },

    #[error("Unsupported query: {message}")]
    UnsupportedQuery { message: String },

    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    #[error("Search exceeded {limit} results")]
    ResultLimitExceeded { limit: usize },

    #[error("{reason}")]
    InvalidCredential { reason: String },

    #[error("{field} '{value}' already exists")]
    AlreadyExists { field: String, value: String },

    #[error("Invalid group: {message}")]
    InvalidGroup { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Backend failure ({backend}): {message}")]
    BackendFailure { backend: String, message: String },
}

impl IdmError {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    pub fn read_only(backend: impl Into<String>) -> Self {
        Self::ReadOnly {
            backend: backend.into(),
        }
    }

    pub fn unsupported_operator(operator: impl ToString) -> Self {
        Self::UnsupportedOperator {
            operator: operator.to_string(),
        }
    }

    pub fn unsupported_attribute(attribute: impl ToString) -> Self {
        Self::UnsupportedAttribute {
            attribute: attribute.to_string(),
        }
    }

    pub fn unsupported_query(message: impl Into<String>) -> Self {
        Self::UnsupportedQuery {
            message: message.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn invalid_credential(reason: impl Into<String>) -> Self {
        Self::InvalidCredential {
            reason: reason.into(),
        }
    }

    pub fn already_exists(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::AlreadyExists {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn invalid_group(message: impl Into<String>) -> Self {
        Self::InvalidGroup {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn backend(backend: impl Into<String>, message: impl ToString) -> Self {
        Self::BackendFailure {
            backend: backend.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IdmError>;
