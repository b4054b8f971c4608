//! # Shinji Repository
//!
//! Generic data access over an explicit unit of work:
//!
//! ```text
//! Application code
//!   ↓  CrudDao<M, C, U>        (generic CRUD, ordering, pagination)
//! DaoBase<M, C, U>
//!   ↓  &dyn Session            (transaction handle owned by the caller)
//! PgSession (SQLx)  |  MemorySession
//!   ↓
//! PostgreSQL        |  MemoryStore
//! ```
//!
//! ## Structure
//!
//! ```text
//! src/
//!   meta.rs          ← EntityMeta, fields and relationships
//!   model.rs         ← Model trait binding a type to its metadata
//!   query.rs         ← immutable Query values and Ordering
//!   session.rs       ← Session trait, statements, BackendError
//!   dao/
//!     mod.rs         ← CrudDao trait, Filters, error translation
//!     base.rs        ← DaoBase
//!   postgres/        ← PgSession and SQL rendering
//!   memory.rs        ← in-memory backend
//!   pool.rs          ← DatabasePool
//! ```

pub mod dao;
pub mod memory;
pub mod meta;
pub mod model;
pub mod pool;
pub mod postgres;
pub mod query;
pub mod session;

pub use dao::{CrudDao, DaoBase, Filters};
pub use memory::{MemorySession, MemoryStore};
pub use meta::{ColumnType, EntityMeta, FieldMeta, Member, RelationKind, RelationMeta};
pub use model::Model;
pub use pool::*;
pub use postgres::PgSession;
pub use query::{Ordering, OrderingField, Query};
pub use session::{BackendError, Outcome, Row, Session, Statement, Write};
