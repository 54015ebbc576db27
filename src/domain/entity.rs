//! Capability contract shared by every persisted entity type.

use std::fmt;

use crate::domain::session::StoreError;
use crate::domain::value::{Record, Value, ValueKind};

/// A persisted record with a unique, immutable identifier and a fixed set of
/// named attributes.
///
/// Implementors describe their table layout through associated constants and
/// convert themselves from the [`Record`] returned by the storage session.
/// [`crate::domain::repositories::Repository`] is generic over this trait.
pub trait Entity: Sized + Clone + fmt::Debug + Send + Sync + 'static {
    /// Identifier type (integer or UUID).
    type Id: Into<Value> + Clone + fmt::Debug + fmt::Display + Send + Sync;

    /// Validated input used to construct a new row.
    type Create: CreateInput;

    /// Validated (possibly partial) input used to mutate an existing row.
    type Update: UpdateInput;

    /// Entity name used in error messages and logs.
    const NAME: &'static str;

    /// Backing table.
    const TABLE: &'static str;

    /// Every attribute with its declared type, identifier included.
    const COLUMNS: &'static [(&'static str, ValueKind)];

    /// Identifier column.
    const ID_COLUMN: &'static str = "id";

    /// Column used to order collection queries.
    const ORDER_BY: &'static str = Self::ID_COLUMN;

    fn id(&self) -> &Self::Id;

    /// Declared type of `column`, or `None` if it is not an attribute.
    fn column_kind(column: &str) -> Option<ValueKind> {
        Self::COLUMNS
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, kind)| *kind)
    }

    fn column_names() -> Vec<&'static str> {
        Self::COLUMNS.iter().map(|(name, _)| *name).collect()
    }

    /// Builds the entity from a stored row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] if a column is missing or mistyped.
    fn from_record(record: Record) -> Result<Self, StoreError>;
}

/// Attribute bag for a new row. Never carries the identifier.
pub trait CreateInput: Send + Sync {
    fn into_record(self) -> Record;
}

/// Attribute bag for changing an existing row. Never carries the identifier.
///
/// Only the attributes present in the returned record are written.
pub trait UpdateInput: Send + Sync {
    fn into_changes(self) -> Record;
}
