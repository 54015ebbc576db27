//! In-process storage session.
//!
//! Tables live in memory behind one async mutex. A transaction holds the lock
//! for its whole lifetime and works on a private copy of the tables, which is
//! published on commit and discarded on rollback or drop. Transactions are
//! therefore fully serialized.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::filter::{Filter, Pagination};
use crate::domain::session::{Session, StoreError, Transaction};
use crate::domain::value::{Record, Value};

/// How a table generates identifiers for inserted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Increasing 64-bit integers starting at 1.
    Serial,
    /// Random v4 UUIDs.
    Uuid,
}

/// Column defaults applied when an insert omits the column.
#[derive(Debug, Clone)]
enum ColumnDefault {
    Value(Value),
    Now,
}

/// Layout and constraints of one in-memory table.
#[derive(Debug, Clone)]
pub struct TableSpec {
    name: String,
    id_column: String,
    key: KeyKind,
    unique: Vec<String>,
    defaults: Vec<(String, ColumnDefault)>,
    references: Vec<ForeignKey>,
}

#[derive(Debug, Clone)]
struct ForeignKey {
    column: String,
    table: String,
    constraint: String,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, key: KeyKind) -> Self {
        Self {
            name: name.into(),
            id_column: "id".to_string(),
            key,
            unique: Vec::new(),
            defaults: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Adds a single-column uniqueness constraint.
    pub fn unique(mut self, column: impl Into<String>) -> Self {
        self.unique.push(column.into());
        self
    }

    /// Fills `column` with `value` when an insert omits it.
    pub fn default_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults
            .push((column.into(), ColumnDefault::Value(value.into())));
        self
    }

    /// Fills `column` with the insert time when an insert omits it.
    pub fn default_now(mut self, column: impl Into<String>) -> Self {
        self.defaults.push((column.into(), ColumnDefault::Now));
        self
    }

    /// Declares that `column` references the identifier of `table`. Deleting
    /// the referenced row deletes the referencing rows too.
    pub fn references(mut self, column: impl Into<String>, table: impl Into<String>) -> Self {
        let column = column.into();
        let constraint = format!("{}_{}_fkey", self.name, column);
        self.references.push(ForeignKey {
            column,
            table: table.into(),
            constraint,
        });
        self
    }
}

#[derive(Debug, Clone)]
struct Table {
    spec: Arc<TableSpec>,
    rows: Vec<Record>,
    next_serial: i64,
}

type Tables = HashMap<String, Table>;

/// Transactional in-memory session.
///
/// Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemorySession {
    tables: Arc<Mutex<Tables>>,
}

impl MemorySession {
    /// Creates a session with the given tables.
    pub fn new(specs: impl IntoIterator<Item = TableSpec>) -> Self {
        let tables = specs
            .into_iter()
            .map(|spec| {
                let table = Table {
                    spec: Arc::new(spec),
                    rows: Vec::new(),
                    next_serial: 1,
                };
                (table.spec.name.clone(), table)
            })
            .collect();

        Self {
            tables: Arc::new(Mutex::new(tables)),
        }
    }

    /// Creates a session with the `urls` and `url_clicks` tables, mirroring
    /// the SQL migrations.
    pub fn shortener() -> Self {
        Self::new([
            TableSpec::new("urls", KeyKind::Uuid)
                .unique("full_url")
                .default_value("is_active", true)
                .default_now("created_at"),
            TableSpec::new("url_clicks", KeyKind::Serial)
                .references("url_id", "urls")
                .default_now("clicked_at"),
        ])
    }

    /// Number of committed rows in `table`.
    pub async fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .await
            .get(table)
            .map_or(0, |t| t.rows.len())
    }
}

#[async_trait]
impl Session for MemorySession {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTransaction { guard, staged })
    }
}

/// An open in-memory transaction.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
}

impl MemoryTransaction {
    fn table(&self, name: &str) -> Result<&Table, StoreError> {
        self.staged
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, StoreError> {
        self.staged
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn matching(&self, table: &str, filter: &Filter) -> Result<Vec<&Record>, StoreError> {
        Ok(self
            .table(table)?
            .rows
            .iter()
            .filter(|row| matches(row, filter))
            .collect())
    }

    /// Checks uniqueness of `row` against every other row of `table`.
    fn check_unique(&self, table: &Table, row: &Record, skip: Option<usize>) -> Result<(), StoreError> {
        let spec = &table.spec;
        let keys = std::iter::once(&spec.id_column).chain(spec.unique.iter());

        for column in keys {
            let Some(value) = row.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let duplicate = table
                .rows
                .iter()
                .enumerate()
                .any(|(i, other)| Some(i) != skip && other.get(column) == Some(value));
            if duplicate {
                let constraint = if *column == spec.id_column {
                    format!("{}_pkey", spec.name)
                } else {
                    format!("{}_{}_key", spec.name, column)
                };
                return Err(StoreError::UniqueViolation {
                    constraint: Some(constraint),
                });
            }
        }
        Ok(())
    }

    /// Checks that every non-null reference of `row` points at an existing row.
    fn check_references(&self, spec: &TableSpec, row: &Record) -> Result<(), StoreError> {
        for fk in &spec.references {
            let Some(value) = row.get(&fk.column).filter(|v| !v.is_null()) else {
                continue;
            };
            let target = self.table(&fk.table)?;
            let exists = target
                .rows
                .iter()
                .any(|r| r.get(&target.spec.id_column) == Some(value));
            if !exists {
                return Err(StoreError::ForeignKeyViolation {
                    constraint: Some(fk.constraint.clone()),
                });
            }
        }
        Ok(())
    }

    /// Deletes rows of other tables referencing `id` in `table`.
    fn cascade_delete(&mut self, table: &str, id: &Value) {
        let mut removed = Vec::new();
        for other in self.staged.values_mut() {
            let spec = other.spec.clone();
            for fk in spec.references.iter().filter(|fk| fk.table == table) {
                other.rows.retain(|row| {
                    let referencing = row.get(&fk.column) == Some(id);
                    if referencing {
                        if let Some(key) = row.get(&spec.id_column) {
                            removed.push((spec.name.clone(), key.clone()));
                        }
                    }
                    !referencing
                });
            }
        }
        for (name, key) in removed {
            self.cascade_delete(&name, &key);
        }
    }
}

fn matches(row: &Record, filter: &Filter) -> bool {
    filter.iter().all(|(column, expected)| match expected {
        Value::Null => row.get(column).is_none_or(Value::is_null),
        value => row.get(column) == Some(value),
    })
}

fn window<T>(rows: Vec<T>, page: Pagination) -> Vec<T> {
    let offset = usize::try_from(page.offset).unwrap_or(0);
    let limit = usize::try_from(page.limit).unwrap_or(0);
    rows.into_iter().skip(offset).take(limit).collect()
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn select(
        &mut self,
        table: &str,
        filter: &Filter,
        order_by: &str,
        page: Pagination,
    ) -> Result<Vec<Record>, StoreError> {
        let mut rows = self.matching(table, filter)?;
        rows.sort_by(|a, b| a.get(order_by).cmp(&b.get(order_by)));

        Ok(window(rows, page).into_iter().cloned().collect())
    }

    async fn count(&mut self, table: &str, filter: &Filter) -> Result<i64, StoreError> {
        let total = self.matching(table, filter)?.len();
        Ok(i64::try_from(total).unwrap_or(i64::MAX))
    }

    async fn insert(&mut self, table: &str, values: Record) -> Result<Record, StoreError> {
        let spec = self.table(table)?.spec.clone();

        let mut row = Record::new();
        for (column, default) in &spec.defaults {
            let value = match default {
                ColumnDefault::Value(v) => v.clone(),
                ColumnDefault::Now => Value::Timestamp(Utc::now()),
            };
            row.set(column.clone(), value);
        }

        let serial = {
            let table = self.table_mut(table)?;
            let serial = table.next_serial;
            table.next_serial += 1;
            serial
        };
        let id = match spec.key {
            KeyKind::Serial => Value::Int(serial),
            KeyKind::Uuid => Value::Uuid(Uuid::new_v4()),
        };
        row.set(spec.id_column.clone(), id);
        row.merge(values);

        self.check_unique(self.table(table)?, &row, None)?;
        self.check_references(&spec, &row)?;

        self.table_mut(table)?.rows.push(row.clone());
        Ok(row)
    }

    async fn update(
        &mut self,
        table: &str,
        id_column: &str,
        id: Value,
        changes: Record,
    ) -> Result<Option<Record>, StoreError> {
        let current = self.table(table)?;
        let Some(index) = current
            .rows
            .iter()
            .position(|row| row.get(id_column) == Some(&id))
        else {
            return Ok(None);
        };

        let mut row = current.rows[index].clone();
        row.merge(changes);

        self.check_unique(current, &row, Some(index))?;
        let spec = current.spec.clone();
        self.check_references(&spec, &row)?;

        self.table_mut(table)?.rows[index] = row.clone();
        Ok(Some(row))
    }

    async fn delete(
        &mut self,
        table: &str,
        id_column: &str,
        id: Value,
    ) -> Result<Option<Record>, StoreError> {
        let rows = &mut self.table_mut(table)?.rows;
        let Some(index) = rows.iter().position(|row| row.get(id_column) == Some(&id)) else {
            return Ok(None);
        };

        let removed = rows.remove(index);
        self.cascade_delete(table, &id);
        Ok(Some(removed))
    }

    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTransaction { mut guard, staged } = self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
