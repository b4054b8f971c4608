//! # Shinji Core
//!
//! Core types, error definitions and the object encoder shared by every
//! Shinji crate. The data-access layer in `shinji-repository` builds on the
//! error taxonomy and pagination types defined here, and runs create/update
//! payloads through [`encoding`] before they reach the store.

pub mod encoding;
pub mod error;
pub mod pagination;
pub mod result;
pub mod telemetry;

pub use encoding::{encode, Encode, EncodeOptions, Encoder, EncodingError};
pub use error::*;
pub use pagination::*;
pub use result::*;
