//! JSON text helpers and the bridge from `serde::Serialize`.

use super::encoder::Encoder;
use super::error::EncodingError;
use super::node::{Encode, Node};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A `Serialize` value captured as JSON so it can flow through the encoder.
///
/// Used for entities that already derive `Serialize`; the serde output is
/// taken as-is and only include/exclude and `exclude_none` still apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Serialized(Value);

impl Serialized {
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Result<Self, EncodingError> {
        Ok(Self(serde_json::to_value(value)?))
    }

    #[must_use]
    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl Encode for Serialized {
    fn to_node(&self) -> Node<'_> {
        self.0.to_node()
    }
}

/// Raw input accepted by [`from_json`].
#[derive(Debug)]
pub enum JsonInput<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
    /// Already-decoded JSON, converted without reparsing.
    Decoded(Value),
}

impl<'a> From<&'a str> for JsonInput<'a> {
    fn from(text: &'a str) -> Self {
        Self::Text(text)
    }
}

impl<'a> From<&'a [u8]> for JsonInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Value> for JsonInput<'_> {
    fn from(value: Value) -> Self {
        Self::Decoded(value)
    }
}

/// Encodes `value` with default options and renders it as compact JSON text.
pub fn to_json_string(value: &dyn Encode) -> Result<String, EncodingError> {
    let encoded = Encoder::new().encode(value)?;
    Ok(serde_json::to_string(&encoded)?)
}

/// Parses JSON text or bytes, or converts an already-decoded value.
pub fn from_json<'a, T: DeserializeOwned>(input: impl Into<JsonInput<'a>>) -> Result<T, EncodingError> {
    let parsed = match input.into() {
        JsonInput::Text(text) => serde_json::from_str(text)?,
        JsonInput::Bytes(bytes) => serde_json::from_slice(bytes)?,
        JsonInput::Decoded(value) => serde_json::from_value(value)?,
    };
    Ok(parsed)
}
