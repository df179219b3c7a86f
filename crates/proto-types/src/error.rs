//! Error types for proto-types crate.

use thiserror::Error;

/// Errors raised while querying a schema or populating a dynamic message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtoTypesError {
    #[error("Message type not found: {0}")]
    MessageNotFound(String),

    #[error("Message name '{name}' is ambiguous, candidates: {}", candidates.join(", "))]
    AmbiguousMessage {
        name: String,
        candidates: Vec<String>,
    },

    #[error("Enum type not found: {0}")]
    EnumNotFound(String),

    #[error("Unknown field number {number} in message {message}")]
    UnknownField { message: String, number: u32 },

    #[error("Invalid value for field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Missing required field: {0}")]
    MissingRequiredField(String),
}

/// Result type alias for proto-types operations.
pub type Result<T> = std::result::Result<T, ProtoTypesError>;
