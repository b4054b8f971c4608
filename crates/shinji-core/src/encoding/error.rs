//! Encoding failures.

use thiserror::Error;

/// Error raised when a value cannot be reduced to JSON.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Neither a mapping view nor an attribute view of the value exists.
    #[error("Cannot encode value of type `{type_name}`: {}", causes.join("; "))]
    Unconvertible {
        type_name: &'static str,
        causes: Vec<String>,
    },

    /// A registered converter rejected the value.
    #[error("Converter for `{type_name}` failed: {message}")]
    Converter {
        type_name: &'static str,
        message: String,
    },

    /// A mapping key encoded to something that cannot key a JSON object.
    #[error("Mapping key must encode to a primitive, got {0}")]
    InvalidKey(String),

    /// JSON text could not be produced or parsed.
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for EncodingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
