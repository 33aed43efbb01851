use std::sync::PoisonError;
use config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MappingError {

    #[error("Codec mismatch: expected {expected}, found {found}")]
    CodecMismatch { expected: String, found: String },

    #[error("No codec registered for {0}")]
    CodecNotFound(String),

    #[error("Schema validation failed for {target}: {reason}")]
    SchemaValidationFailure { target: String, reason: String },

    #[error("Injection order violation: {0} used before dependency injection completed")]
    InjectionOrderViolation(String),

    #[error("Mandatory column `{0}` cannot be null")]
    MissingMandatory(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Cannot instantiate {0}")]
    Instantiation(String),

    #[error("Invalid entity definition: {0}")]
    InvalidEntity(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("serde error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl MappingError {
    pub fn mismatch(expected: impl ToString, found: impl ToString) -> Self {
        MappingError::CodecMismatch { expected: expected.to_string(), found: found.to_string() }
    }

    pub fn schema(target: impl Into<String>, reason: impl Into<String>) -> Self {
        MappingError::SchemaValidationFailure { target: target.into(), reason: reason.into() }
    }

    pub fn unbound(what: impl Into<String>) -> Self {
        MappingError::InjectionOrderViolation(what.into())
    }

    /// Bootstrap must abort on these, request-time callers may recover from the rest.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MappingError::SchemaValidationFailure { .. }
                | MappingError::InjectionOrderViolation(_)
                | MappingError::CodecNotFound(_)
                | MappingError::InvalidEntity(_)
        )
    }
}

impl<T> From<PoisonError<T>> for MappingError
{
    fn from(e: PoisonError<T>) -> Self {
        MappingError::Custom(format!("Poison error: {:?}", e.to_string()))
    }
}
