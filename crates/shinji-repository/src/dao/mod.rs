//! Generic data access objects.
//!
//! A DAO is bound to one entity type and is handed the unit of work
//! explicitly on every call:
//!
//! ```text
//! Application code
//!   ↓  &dyn CrudDao<M, C, U>
//! DaoBase<M, C, U>        (encoding, ordering, pagination)
//!   ↓  &dyn Session       (caller-owned transaction)
//! PgSession / MemorySession
//! ```
//!
//! Backend failures never cross this boundary as-is: every session call goes
//! through [`translate`], so callers only ever see
//! [`ShinjiError::Conflict`] or [`ShinjiError::Store`].

mod base;

pub use base::DaoBase;

use crate::model::Model;
use crate::query::{Ordering, Query};
use crate::session::{BackendError, Outcome, Session, Statement};
use async_trait::async_trait;
use serde_json::{Map, Value};
use shinji_core::encoding::Encode;
use shinji_core::{Page, PageRequest, ShinjiError, ShinjiResult};
use tracing::warn;
use uuid::Uuid;

/// CRUD access to entities of type `M`, created from `C` and updated from `U`.
#[async_trait]
pub trait CrudDao<M, C, U>: Send + Sync
where
    M: Model,
    C: Encode + Sync,
    U: Encode + Sync,
{
    /// Runs a statement, translating backend failures.
    async fn execute(&self, db: &dyn Session, statement: Statement) -> ShinjiResult<Outcome>;

    /// Fetches one entity by id; `None` when no row matches.
    async fn get(&self, db: &dyn Session, id: Uuid) -> ShinjiResult<Option<M>>;

    /// Fetches one window of the filtered, ordered entities together with the
    /// number of entities matching the filters. `limit` is taken as given.
    ///
    /// Ordering through a to-many relationship joins one row per related
    /// entity, and `skip`/`limit` count those joined rows. Repeats are
    /// dropped within a window, so such a window may hold fewer than `limit`
    /// entities and the same entity may show up on more than one window.
    async fn get_multi(
        &self,
        db: &dyn Session,
        skip: u64,
        limit: u64,
        filters: &Filters,
        ordering: Option<&Ordering>,
    ) -> ShinjiResult<(Vec<M>, u64)>;

    /// [`get_multi`](Self::get_multi) wrapped in a [`Page`], with the page
    /// size clamped to the configured maximum.
    async fn get_page(
        &self,
        db: &dyn Session,
        page: PageRequest,
        filters: &Filters,
        ordering: Option<&Ordering>,
    ) -> ShinjiResult<Page<M>>;

    /// Creates an entity from `spec`.
    ///
    /// With `commit`, the transaction is committed and the entity re-read so
    /// store-computed columns are populated. Without it the caller owns the
    /// transaction and the returned entity carries only the supplied fields.
    async fn create(&self, db: &dyn Session, spec: &C, commit: bool) -> ShinjiResult<M>;

    /// Stages already-built entities in one transaction.
    async fn create_many(&self, db: &dyn Session, entities: Vec<M>, commit: bool) -> ShinjiResult<Vec<M>>;

    /// Applies `spec` onto `entity`.
    ///
    /// Records apply only the fields the caller set; plain mappings apply
    /// every key. The id is never reassigned.
    async fn update(&self, db: &dyn Session, entity: M, spec: &U, commit: bool) -> ShinjiResult<M>;

    /// Removes `entity` and hands it back detached.
    async fn delete(&self, db: &dyn Session, entity: M, commit: bool) -> ShinjiResult<M>;

    /// Counts the entities selected by `query`, ignoring its ordering and bounds.
    async fn count(&self, db: &dyn Session, query: &Query) -> ShinjiResult<u64>;

    /// Appends `ordering` to `query`, joining relationships along each path.
    ///
    /// Fails with [`ShinjiError::UnresolvableOrderingField`] when any path
    /// segment does not exist; `query` itself is left untouched.
    fn order_by(&self, query: &Query, ordering: &Ordering) -> ShinjiResult<Query>;

    /// The base selection of every entity.
    fn select(&self) -> Query;
}

/// Equality predicates for [`CrudDao::get_multi`], applied in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(Vec<(String, Value)>);

impl Filters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `field = value`; a `null` value matches missing values.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((field.into(), value.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(field, value)| (field.as_str(), value))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Filters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Maps a backend failure onto the DAO error kinds.
pub(crate) fn translate(err: BackendError) -> ShinjiError {
    warn!(error = %err, "Store operation failed");
    match err {
        BackendError::Integrity(message) => ShinjiError::conflict(message),
        BackendError::Transient(message) => ShinjiError::store(503, message, true),
        BackendError::Other(message) => ShinjiError::store(500, message, false),
    }
}
