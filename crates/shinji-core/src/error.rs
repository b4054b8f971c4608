//! Unified error types for the data-access and encoding layers.

use crate::encoding::EncodingError;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for Shinji.
///
/// Storage failures reach callers only as [`ShinjiError::Conflict`] or
/// [`ShinjiError::Store`]; a missing row is never an error and is reported
/// as `None` by the DAO instead.
#[derive(Error, Debug)]
pub enum ShinjiError {
    // ============ Storage Errors ============
    /// Uniqueness or integrity violation reported by the store.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other storage failure.
    #[error("Store error ({status}): {message}")]
    Store {
        status: u16,
        message: String,
        retriable: bool,
    },

    // ============ Query Errors ============
    /// An ordering path segment does not exist on the entity or a related entity.
    #[error("Cannot order {entity} by `{path}`: unknown field or relationship `{segment}`")]
    UnresolvableOrderingField {
        entity: &'static str,
        path: String,
        segment: String,
    },

    /// An equality filter names a field the entity does not have.
    #[error("Cannot filter {entity} by unknown field `{field}`")]
    UnknownFilterField { entity: &'static str, field: String },

    // ============ Encoding Errors ============
    /// A value could not be reduced to JSON.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    // ============ Application Errors ============
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShinjiError {
    /// Returns the HTTP-equivalent status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Conflict(_) => 409,
            Self::Store { status, .. } => *status,
            Self::UnresolvableOrderingField { .. } | Self::UnknownFilterField { .. } | Self::Validation(_) => 400,
            Self::Encoding(_) => 422,
            Self::Configuration(_) | Self::Internal(_) | Self::Other(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Conflict(_) => "CONFLICT",
            Self::Store { .. } => "STORE_ERROR",
            Self::UnresolvableOrderingField { .. } => "UNRESOLVABLE_ORDERING_FIELD",
            Self::UnknownFilterField { .. } => "UNKNOWN_FILTER_FIELD",
            Self::Encoding(_) => "ENCODING_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict<T: Into<String>>(message: T) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates a store error with the given status classification.
    #[must_use]
    pub fn store<T: Into<String>>(status: u16, message: T, retriable: bool) -> Self {
        Self::Store {
            status,
            message: message.into(),
            retriable,
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is retriable.
    ///
    /// Only store errors the backend flagged as transient qualify; a conflict
    /// must be resolved by the caller before retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Store { retriable: true, .. })
    }
}

impl From<serde_json::Error> for ShinjiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {}", err))
    }
}

/// Serializable error response for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Request trace ID for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl ErrorResponse {
    /// Creates a new error response from a `ShinjiError`.
    #[must_use]
    pub fn from_error(error: &ShinjiError) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            trace_id: None,
        }
    }

    /// Sets the trace ID.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}

impl From<&ShinjiError> for ErrorResponse {
    fn from(error: &ShinjiError) -> Self {
        Self::from_error(error)
    }
}
