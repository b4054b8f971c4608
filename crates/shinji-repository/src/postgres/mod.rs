//! PostgreSQL backend.

mod session;
pub(crate) mod sql;

pub use session::PgSession;
