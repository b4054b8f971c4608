//! A [`Session`] over one PostgreSQL transaction.

use super::sql;
use crate::meta::EntityMeta;
use crate::query::Query;
use crate::session::{BackendError, Outcome, Row, Session, Statement, Write};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row as _, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Default)]
struct PgState {
    tx: Option<Transaction<'static, Postgres>>,
    pending: Vec<Write>,
}

impl PgState {
    /// Rolls back the open transaction, if any, and drops staged writes.
    async fn discard(&mut self) {
        self.pending.clear();
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                warn!("Rollback failed: {}", e);
            }
        }
    }
}

/// A session holding at most one open transaction.
///
/// The transaction begins lazily on first use and ends on
/// [`commit`](Session::commit) or [`rollback`](Session::rollback).
pub struct PgSession {
    pool: PgPool,
    state: Mutex<PgState>,
}

impl PgSession {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            state: Mutex::new(PgState::default()),
        }
    }

    async fn begin<'s>(
        &self,
        state: &'s mut PgState,
    ) -> Result<&'s mut Transaction<'static, Postgres>, BackendError> {
        let tx = match state.tx.take() {
            Some(tx) => tx,
            None => {
                debug!("Beginning transaction");
                self.pool.begin().await?
            }
        };
        Ok(state.tx.insert(tx))
    }

    async fn flush_locked(&self, state: &mut PgState) -> Result<(), BackendError> {
        if state.pending.is_empty() {
            return Ok(());
        }
        let writes = std::mem::take(&mut state.pending);
        let result = self.apply(state, &writes).await;
        if result.is_err() {
            state.discard().await;
        }
        result
    }

    async fn apply(&self, state: &mut PgState, writes: &[Write]) -> Result<(), BackendError> {
        let tx = self.begin(state).await?;
        for write in writes {
            let mut builder = sql::write(write)?;
            builder.build().execute(&mut **tx).await?;
        }
        debug!(writes = writes.len(), "Flushed staged writes");
        Ok(())
    }

    async fn run(&self, state: &mut PgState, statement: Statement) -> Result<Outcome, BackendError> {
        let tx = self.begin(state).await?;
        match statement {
            Statement::Select(query) => {
                let mut builder = sql::select(&query)?;
                let rows = builder.build().fetch_all(&mut **tx).await?;
                rows.iter()
                    .map(|row| match row.try_get::<Value, _>("row")? {
                        Value::Object(row) => Ok(row),
                        other => Err(BackendError::Other(format!("expected a row object, got {}", other))),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Outcome::Rows)
            }
            Statement::Count(query) => {
                let mut builder = sql::count(&query)?;
                let count: i64 = builder.build_query_scalar().fetch_one(&mut **tx).await?;
                Ok(Outcome::Scalar(count))
            }
            Statement::Delete(query) => {
                let mut builder = sql::delete(&query)?;
                let result = builder.build().execute(&mut **tx).await?;
                Ok(Outcome::Scalar(i64::try_from(result.rows_affected()).unwrap_or(i64::MAX)))
            }
        }
    }
}

#[async_trait]
impl Session for PgSession {
    async fn execute(&self, statement: Statement) -> Result<Outcome, BackendError> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await?;
        let result = self.run(&mut state, statement).await;
        // A failed statement aborts the transaction in PostgreSQL.
        if result.is_err() {
            state.discard().await;
        }
        result
    }

    async fn add(&self, meta: &'static EntityMeta, row: Row) -> Result<(), BackendError> {
        self.state.lock().await.pending.push(Write::Insert { meta, row });
        Ok(())
    }

    async fn update(&self, meta: &'static EntityMeta, id: Uuid, changes: Row) -> Result<(), BackendError> {
        self.state.lock().await.pending.push(Write::Update { meta, id, changes });
        Ok(())
    }

    async fn remove(&self, meta: &'static EntityMeta, id: Uuid) -> Result<(), BackendError> {
        self.state.lock().await.pending.push(Write::Remove { meta, id });
        Ok(())
    }

    async fn flush(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    async fn commit(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await?;
        if let Some(tx) = state.tx.take() {
            tx.commit().await?;
            debug!("Transaction committed");
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), BackendError> {
        self.state.lock().await.discard().await;
        Ok(())
    }

    async fn refresh(&self, meta: &'static EntityMeta, id: Uuid) -> Result<Option<Row>, BackendError> {
        let query = Query::new(meta).filter_id(id).limit(1);
        match self.execute(Statement::Select(query)).await? {
            Outcome::Rows(rows) => Ok(rows.into_iter().next()),
            Outcome::Scalar(_) => Ok(None),
        }
    }
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession").field("pool_size", &self.pool.size()).finish_non_exhaustive()
    }
}
