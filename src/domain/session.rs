//! Storage session contract consumed by the generic repository.
//!
//! A [`Session`] hands out [`Transaction`]s. The repository opens exactly one
//! transaction per operation and always finishes it with either
//! [`Transaction::commit`] or [`Transaction::rollback`]. Backends must also
//! roll back a transaction that is dropped without being finished, which covers
//! cancelled futures.
//!
//! # Implementations
//!
//! - [`crate::infrastructure::persistence::PgSession`] - PostgreSQL via SQLx
//! - [`crate::infrastructure::persistence::MemorySession`] - in-process tables
//! - Test mocks available with `cfg(test)`

use async_trait::async_trait;

use crate::domain::filter::{Filter, Pagination};
use crate::domain::value::{Record, Value};

/// Failures reported by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated{}", fmt_constraint(.constraint))]
    UniqueViolation { constraint: Option<String> },

    #[error("foreign key constraint violated{}", fmt_constraint(.constraint))]
    ForeignKeyViolation { constraint: Option<String> },

    #[error("column `{column}`: expected {expected}, found {found}")]
    Decode {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("unknown table `{0}`")]
    UnknownTable(String),

    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

fn fmt_constraint(constraint: &Option<String>) -> String {
    constraint
        .as_deref()
        .map(|c| format!(" ({c})"))
        .unwrap_or_default()
}

/// Source of transactions against one store.
#[cfg_attr(test, mockall::automock(type Tx = MockTransaction;))]
#[async_trait]
pub trait Session: Send + Sync {
    type Tx: Transaction;

    /// Opens a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if no connection could be acquired.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// One open unit of work.
///
/// Statements only address tables and columns by name; identifiers come from
/// [`crate::domain::entity::Entity`] constants and validated filters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transaction: Send {
    /// Returns rows of `table` matching every condition in `filter`, ordered
    /// ascending by `order_by` and sliced by `page`.
    async fn select(
        &mut self,
        table: &str,
        filter: &Filter,
        order_by: &str,
        page: Pagination,
    ) -> Result<Vec<Record>, StoreError>;

    /// Counts rows of `table` matching `filter`.
    async fn count(&mut self, table: &str, filter: &Filter) -> Result<i64, StoreError>;

    /// Inserts one row and returns it as stored, with generated identifier
    /// and column defaults filled in.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] or
    /// [`StoreError::ForeignKeyViolation`] on constraint failures.
    async fn insert(&mut self, table: &str, values: Record) -> Result<Record, StoreError>;

    /// Applies `changes` to the row whose `id_column` equals `id`.
    ///
    /// Returns `Ok(None)` if no such row exists.
    async fn update(
        &mut self,
        table: &str,
        id_column: &str,
        id: Value,
        changes: Record,
    ) -> Result<Option<Record>, StoreError>;

    /// Deletes the row whose `id_column` equals `id`, returning it as it was
    /// immediately before deletion. `Ok(None)` if no such row exists.
    async fn delete(
        &mut self,
        table: &str,
        id_column: &str,
        id: Value,
    ) -> Result<Option<Record>, StoreError>;

    /// Makes every change of this transaction durable.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discards every change of this transaction.
    async fn rollback(self) -> Result<(), StoreError>;
}
