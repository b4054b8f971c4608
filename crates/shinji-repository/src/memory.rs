//! In-memory backend.
//!
//! A [`MemoryStore`] holds committed tables; each [`MemorySession`] works on
//! a snapshot taken when its transaction starts. On commit the session's
//! changes are replayed onto the tables committed at that moment, so other
//! sessions' commits are kept and a failed replay publishes nothing.
//! Primary keys and unique fields are enforced at flush time, rows keep
//! their insertion order, and nulls sort after every other value.

use crate::meta::EntityMeta;
use crate::query::{Filter, Query, ROOT_ALIAS};
use crate::session::{BackendError, Outcome, Row, Session, Statement, Write};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

type Tables = HashMap<String, Vec<Row>>;

static NULL: Value = Value::Null;

/// Committed state shared by every session opened on it.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session on this store.
    #[must_use]
    pub fn session(&self) -> MemorySession {
        MemorySession {
            store: self.clone(),
            state: Mutex::new(TxState::default()),
        }
    }

    /// Committed rows of one entity, in insertion order.
    #[must_use]
    pub fn rows(&self, meta: &EntityMeta) -> Vec<Row> {
        self.tables.read().get(meta.table()).cloned().unwrap_or_default()
    }
}

/// A change already applied to the working snapshot, kept for commit.
#[derive(Debug, Clone)]
enum Change {
    Write(Write),
    Delete(Query),
}

#[derive(Debug, Default)]
struct TxState {
    working: Option<Tables>,
    pending: Vec<Write>,
    journal: Vec<Change>,
}

impl TxState {
    fn discard(&mut self) {
        self.working = None;
        self.pending.clear();
        self.journal.clear();
    }
}

/// A session over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    state: Mutex<TxState>,
}

impl MemorySession {
    fn working<'s>(&self, state: &'s mut TxState) -> &'s mut Tables {
        let tables = match state.working.take() {
            Some(tables) => tables,
            None => self.store.tables.read().clone(),
        };
        state.working.insert(tables)
    }

    fn flush_locked(&self, state: &mut TxState) -> Result<(), BackendError> {
        if state.pending.is_empty() {
            return Ok(());
        }
        let writes = std::mem::take(&mut state.pending);
        let tables = self.working(state);
        for write in &writes {
            if let Err(err) = apply(tables, write) {
                debug!(error = %err, "Flush failed, discarding transaction");
                state.discard();
                return Err(err);
            }
        }
        state.journal.extend(writes.into_iter().map(Change::Write));
        Ok(())
    }

    fn stage(&self, write: Write) {
        self.state.lock().pending.push(write);
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn execute(&self, statement: Statement) -> Result<Outcome, BackendError> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)?;
        let tables = self.working(&mut state);

        match statement {
            Statement::Select(query) => Ok(Outcome::Rows(
                select(tables, &query).into_iter().cloned().collect(),
            )),
            Statement::Count(query) => {
                let count = rows_of(tables, query.meta())
                    .iter()
                    .filter(|row| matches_filters(row, query.filters()))
                    .count();
                Ok(Outcome::Scalar(count as i64))
            }
            Statement::Delete(query) => {
                let deleted = delete_matching(tables, &query);
                if deleted > 0 {
                    state.journal.push(Change::Delete(query));
                }
                Ok(Outcome::Scalar(deleted as i64))
            }
        }
    }

    async fn add(&self, meta: &'static EntityMeta, row: Row) -> Result<(), BackendError> {
        self.stage(Write::Insert { meta, row });
        Ok(())
    }

    async fn update(&self, meta: &'static EntityMeta, id: Uuid, changes: Row) -> Result<(), BackendError> {
        self.stage(Write::Update { meta, id, changes });
        Ok(())
    }

    async fn remove(&self, meta: &'static EntityMeta, id: Uuid) -> Result<(), BackendError> {
        self.stage(Write::Remove { meta, id });
        Ok(())
    }

    async fn flush(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    async fn commit(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)?;
        let journal = std::mem::take(&mut state.journal);
        state.working = None;
        if journal.is_empty() {
            return Ok(());
        }

        let mut committed = self.store.tables.write();
        let mut next = committed.clone();
        for change in &journal {
            let replayed = match change {
                Change::Write(write) => apply(&mut next, write),
                Change::Delete(query) => {
                    delete_matching(&mut next, query);
                    Ok(())
                }
            };
            if let Err(err) = replayed {
                debug!(error = %err, "Commit failed, discarding transaction");
                state.discard();
                return Err(err);
            }
        }
        *committed = next;
        debug!(changes = journal.len(), "Committed transaction");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), BackendError> {
        self.state.lock().discard();
        Ok(())
    }

    async fn refresh(&self, meta: &'static EntityMeta, id: Uuid) -> Result<Option<Row>, BackendError> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)?;
        let tables = self.working(&mut state);
        let id = Value::String(id.to_string());
        Ok(rows_of(tables, meta)
            .iter()
            .find(|row| row.get(meta.id_field()).is_some_and(|v| compare(v, &id) == Ordering::Equal))
            .cloned())
    }
}

fn rows_of<'t>(tables: &'t Tables, meta: &EntityMeta) -> &'t [Row] {
    tables.get(meta.table()).map_or(&[], Vec::as_slice)
}

fn apply(tables: &mut Tables, write: &Write) -> Result<(), BackendError> {
    match write {
        Write::Insert { meta, row } => {
            let rows = tables.entry(meta.table().to_string()).or_default();
            let mut row = row.clone();
            for field in meta.fields() {
                row.entry(field.name).or_insert(Value::Null);
            }
            check_unique(meta, rows, &row, None)?;
            rows.push(row);
            Ok(())
        }
        Write::Update { meta, id, changes } => {
            let rows = tables.entry(meta.table().to_string()).or_default();
            let index = position(meta, rows, *id)?;
            let mut row = rows[index].clone();
            for (column, value) in changes {
                row.insert(column.clone(), value.clone());
            }
            check_unique(meta, rows, &row, Some(index))?;
            rows[index] = row;
            Ok(())
        }
        Write::Remove { meta, id } => {
            let rows = tables.entry(meta.table().to_string()).or_default();
            let index = position(meta, rows, *id)?;
            rows.remove(index);
            Ok(())
        }
    }
}

fn delete_matching(tables: &mut Tables, query: &Query) -> usize {
    let Some(rows) = tables.get_mut(query.meta().table()) else {
        return 0;
    };
    let before = rows.len();
    rows.retain(|row| !matches_filters(row, query.filters()));
    before - rows.len()
}

fn position(meta: &EntityMeta, rows: &[Row], id: Uuid) -> Result<usize, BackendError> {
    let needle = Value::String(id.to_string());
    rows.iter()
        .position(|row| row.get(meta.id_field()).is_some_and(|v| compare(v, &needle) == Ordering::Equal))
        .ok_or_else(|| BackendError::Other(format!("no {} row with id {}", meta.table(), id)))
}

fn check_unique(meta: &EntityMeta, rows: &[Row], row: &Row, skip: Option<usize>) -> Result<(), BackendError> {
    for field in meta.fields().iter().filter(|f| f.unique) {
        let Some(value) = row.get(field.name).filter(|v| !v.is_null()) else {
            continue;
        };
        let clash = rows
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .any(|(_, other)| other.get(field.name).is_some_and(|v| compare(v, value) == Ordering::Equal));
        if clash {
            return Err(BackendError::Integrity(format!(
                "duplicate key value violates unique constraint \"{}_{}_key\"",
                meta.table(),
                field.name
            )));
        }
    }
    Ok(())
}

fn matches_filters(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        let value = row.get(filter.column).unwrap_or(&NULL);
        compare(value, &filter.value) == Ordering::Equal
    })
}

/// Evaluates a select: filter the root rows, left-join every relation,
/// sort stably, then paginate.
fn select<'t>(tables: &'t Tables, query: &Query) -> Vec<&'t Row> {
    type Tuple<'t> = HashMap<String, Option<&'t Row>>;

    let mut tuples: Vec<Tuple<'t>> = rows_of(tables, query.meta())
        .iter()
        .filter(|row| matches_filters(row, query.filters()))
        .map(|row| HashMap::from([(ROOT_ALIAS.to_string(), Some(row))]))
        .collect();

    for join in query.joins() {
        let targets = rows_of(tables, join.relation.target());
        let relation = join.relation;
        tuples = tuples
            .into_iter()
            .flat_map(|tuple| {
                let key = tuple
                    .get(&join.parent)
                    .copied()
                    .flatten()
                    .and_then(|parent| parent.get(relation.local_key))
                    .filter(|key| !key.is_null());
                let matched: Vec<&'t Row> = key.map_or_else(Vec::new, |key| {
                    targets
                        .iter()
                        .filter(|target| {
                            target
                                .get(relation.remote_key)
                                .is_some_and(|v| compare(v, key) == Ordering::Equal)
                        })
                        .collect()
                });
                if matched.is_empty() {
                    let mut tuple = tuple;
                    tuple.insert(join.alias.clone(), None);
                    vec![tuple]
                } else {
                    matched
                        .into_iter()
                        .map(|target| {
                            let mut tuple = tuple.clone();
                            tuple.insert(join.alias.clone(), Some(target));
                            tuple
                        })
                        .collect()
                }
            })
            .collect();
    }

    if !query.ordering().is_empty() {
        tuples.sort_by(|a, b| {
            for clause in query.ordering() {
                let left = lookup(a, &clause.alias, clause.column);
                let right = lookup(b, &clause.alias, clause.column);
                let ordering = if clause.descending {
                    compare(right, left)
                } else {
                    compare(left, right)
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let (offset, limit) = query.bounds();
    tuples
        .into_iter()
        .filter_map(|tuple| tuple.get(ROOT_ALIAS).copied().flatten())
        .skip(usize::try_from(offset.unwrap_or(0)).unwrap_or(usize::MAX))
        .take(limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX)))
        .collect()
}

fn lookup<'t>(tuple: &HashMap<String, Option<&'t Row>>, alias: &str, column: &str) -> &'t Value {
    tuple
        .get(alias)
        .copied()
        .flatten()
        .and_then(|row| row.get(column))
        .unwrap_or(&NULL)
}

/// Total order over JSON values; null sorts after everything else.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
