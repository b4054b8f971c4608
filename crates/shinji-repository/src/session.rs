//! The transactional session contract shared by every backend.

use crate::meta::EntityMeta;
use crate::query::Query;
use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// A stored row: column name to JSON value.
pub type Row = Map<String, Value>;

/// A read or bulk write against the store.
#[derive(Debug, Clone)]
pub enum Statement {
    /// Fetch the selected entities' rows.
    Select(Query),
    /// Count the selected entities; joins and ordering are ignored.
    Count(Query),
    /// Delete the selected entities, returning how many were removed.
    Delete(Query),
}

/// Result of a [`Statement`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rows(Vec<Row>),
    Scalar(i64),
}

/// A write staged in a session until the next flush.
#[derive(Debug, Clone)]
pub enum Write {
    Insert {
        meta: &'static EntityMeta,
        row: Row,
    },
    Update {
        meta: &'static EntityMeta,
        id: Uuid,
        changes: Row,
    },
    Remove {
        meta: &'static EntityMeta,
        id: Uuid,
    },
}

/// Failure reported by a backend, before translation into `ShinjiError`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Uniqueness, foreign key or check constraint violation.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// The operation may succeed if retried (pool exhausted, connection lost,
    /// serialization failure).
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code();
                match code.as_deref() {
                    // integrity_constraint_violation
                    Some(code) if code.starts_with("23") => Self::Integrity(db_err.message().to_string()),
                    // serialization failure, deadlock, connection exception, insufficient resources
                    Some(code)
                        if code.starts_with("40") || code.starts_with("08") || code.starts_with("53") =>
                    {
                        Self::Transient(db_err.message().to_string())
                    }
                    _ => Self::Other(err.to_string()),
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::WorkerCrashed => Self::Transient(err.to_string()),
            _ => Self::Other(err.to_string()),
        }
    }
}

/// An explicit unit of work.
///
/// Writes are staged with [`add`](Session::add), [`update`](Session::update)
/// and [`remove`](Session::remove) and reach the store on
/// [`flush`](Session::flush). Statements flush staged writes first, so a
/// caller chaining several uncommitted operations reads its own writes.
/// When a flush or a commit fails, the session discards the whole
/// transaction and starts fresh on next use.
#[async_trait]
pub trait Session: Send + Sync {
    async fn execute(&self, statement: Statement) -> Result<Outcome, BackendError>;

    /// Stages an insert of `row`.
    async fn add(&self, meta: &'static EntityMeta, row: Row) -> Result<(), BackendError>;

    /// Stages an update of the columns in `changes`.
    async fn update(&self, meta: &'static EntityMeta, id: Uuid, changes: Row) -> Result<(), BackendError>;

    /// Stages a delete.
    async fn remove(&self, meta: &'static EntityMeta, id: Uuid) -> Result<(), BackendError>;

    async fn flush(&self) -> Result<(), BackendError>;

    async fn commit(&self) -> Result<(), BackendError>;

    async fn rollback(&self) -> Result<(), BackendError>;

    /// Re-reads one row, including store-computed columns.
    async fn refresh(&self, meta: &'static EntityMeta, id: Uuid) -> Result<Option<Row>, BackendError>;
}
