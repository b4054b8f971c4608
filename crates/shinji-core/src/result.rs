//! Result type aliases for Shinji.

use crate::ShinjiError;

/// A specialized `Result` type for Shinji operations.
pub type ShinjiResult<T> = Result<T, ShinjiError>;
