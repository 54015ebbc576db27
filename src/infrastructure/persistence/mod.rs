//! Storage backends implementing [`crate::domain::session::Session`].
//!
//! # Backends
//!
//! - [`PgSession`] - PostgreSQL through an SQLx connection pool
//! - [`MemorySession`] - Process-local tables, used by tests and dry runs

pub mod memory_session;
pub mod pg_session;

pub use memory_session::{KeyKind, MemorySession, MemoryTransaction, TableSpec};
pub use pg_session::{PgSession, PgTransaction};
