//! The contract persisted entity types fulfil.

use crate::meta::EntityMeta;
use crate::session::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shinji_core::ShinjiResult;
use uuid::Uuid;

/// A persisted entity.
///
/// Rows travel as JSON objects keyed by column name, so the serde
/// representation of a model must match its columns. Fields the store
/// computes (defaults, timestamps) should carry `#[serde(default)]`.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn meta() -> &'static EntityMeta;

    fn id(&self) -> Uuid;
}

/// Builds an entity from a stored row.
pub(crate) fn from_row<M: Model>(row: Row) -> ShinjiResult<M> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Serializes an entity into its column map.
pub(crate) fn to_row<M: Model>(entity: &M) -> ShinjiResult<Row> {
    match serde_json::to_value(entity)? {
        Value::Object(row) => Ok(row),
        other => Err(shinji_core::ShinjiError::internal(format!(
            "{} serialized to a non-object value: {}",
            M::meta().name(),
            other
        ))),
    }
}
