//! Object encoding.
//!
//! Reduces arbitrary values to [`serde_json::Value`] by walking their
//! [`Node`] structure. Primitives pass through, mappings and sequences
//! recurse, records honour their field schema, and everything else is
//! resolved through a [`ConverterSet`].

mod encoder;
mod error;
mod json;
mod node;
mod record;
pub mod registry;

pub use encoder::{EncodeOptions, Encoder, RESERVED_KEY_PREFIX};
pub use error::EncodingError;
pub use json::{from_json, to_json_string, JsonInput, Serialized};
pub use node::{borrowed, owned, AsAny, Binary, Child, Drain, Encode, Entries, Items, Node, Opaque, TypeFamily};
pub use record::{FieldEntry, MaybeSet, Record};
pub use registry::{Converter, ConverterSet};

/// Encodes `value` with default options and the process-wide registry.
pub fn encode(value: &dyn Encode) -> Result<serde_json::Value, EncodingError> {
    Encoder::new().encode(value)
}
