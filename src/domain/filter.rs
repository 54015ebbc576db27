//! Equality filters and pagination for collection queries.

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

use crate::domain::entity::Entity;
use crate::domain::value::Value;
use crate::error::AppError;

/// Default page size for [`Pagination`].
pub const DEFAULT_LIMIT: i64 = 100;

/// Conjunction of `attribute = value` conditions.
///
/// An empty filter matches every row. A [`Value::Null`] condition matches
/// rows where the attribute is null. Attribute names are checked against the
/// entity's attribute set by [`Filter::validate`] before a query is issued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Filter {
    conditions: BTreeMap<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality condition. A later condition on the same attribute
    /// replaces the earlier one.
    pub fn eq(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(attribute.into(), value.into());
        self
    }

    /// Forces `attribute = value`, overriding any caller-supplied condition
    /// on the same attribute.
    pub fn scoped(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.eq(attribute, value)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.conditions.get(attribute)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Checks every condition against `E::COLUMNS`. A null value matches
    /// any attribute type.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] naming the first unknown attribute or
    /// the first value whose type differs from the attribute's.
    pub fn validate<E: Entity>(&self) -> Result<(), AppError> {
        check_attributes::<E>(self.iter())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter().fold(Filter::new(), |f, (k, v)| f.eq(k, v))
    }
}

/// Rejects attributes `E` does not have and non-null values of the wrong type.
pub(crate) fn check_attributes<'a, E: Entity>(
    attributes: impl IntoIterator<Item = (&'a str, &'a Value)>,
) -> Result<(), AppError> {
    for (column, value) in attributes {
        let Some(expected) = E::column_kind(column) else {
            return Err(AppError::bad_request(
                format!("Unknown attribute `{column}` for {}", E::NAME),
                json!({ "attribute": column, "allowed": E::column_names() }),
            ));
        };

        if let Some(found) = value.kind()
            && found != expected
        {
            return Err(AppError::bad_request(
                format!(
                    "Attribute `{column}` of {} expects {}, got {}",
                    E::NAME,
                    expected.name(),
                    found.name()
                ),
                json!({ "attribute": column, "expected": expected, "found": found }),
            ));
        }
    }
    Ok(())
}

/// Offset/limit window over an ordered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }

    /// Window holding at most one row; used for lookups by identifier.
    pub fn single() -> Self {
        Self::new(0, 1)
    }

    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if offset or limit is negative.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.offset < 0 || self.limit < 0 {
            return Err(AppError::bad_request(
                "Offset and limit must not be negative",
                json!({ "offset": self.offset, "limit": self.limit }),
            ));
        }
        Ok(())
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(0, DEFAULT_LIMIT)
    }
}
