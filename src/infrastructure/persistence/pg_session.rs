//! PostgreSQL storage session.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, QueryBuilder, Row, TypeInfo};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::filter::{Filter, Pagination};
use crate::domain::session::{Session, StoreError, Transaction};
use crate::domain::value::{Record, Value};

type Query = QueryBuilder<'static, Postgres>;

/// PostgreSQL session backed by a SQLx connection pool.
///
/// Statements are assembled with [`QueryBuilder`]; every value is sent as a
/// bind parameter and every identifier is quoted after validation.
#[derive(Clone)]
pub struct PgSession {
    pool: Arc<PgPool>,
}

impl PgSession {
    /// Creates a session over an existing pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Connects a pool using the configured limits and timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database is unreachable.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(config.db_connect_timeout))
            .idle_timeout(Duration::from_secs(config.db_idle_timeout))
            .max_lifetime(Duration::from_secs(config.db_max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(map_sqlx_error)?;

        tracing::info!("Connected to database");
        Ok(Self::new(Arc::new(pool)))
    }

    /// Applies pending migrations from `./migrations`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Backend(Box::new(e)))?;

        tracing::info!("Migrations applied");
        Ok(())
    }

    /// Round-trips a trivial query to verify connectivity.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }
}

#[async_trait]
impl Session for PgSession {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, StoreError> {
        let inner = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(PgTransaction { inner })
    }
}

/// An open PostgreSQL transaction. Dropping it unfinished rolls it back.
pub struct PgTransaction {
    inner: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn select(
        &mut self,
        table: &str,
        filter: &Filter,
        order_by: &str,
        page: Pagination,
    ) -> Result<Vec<Record>, StoreError> {
        let mut query = select_query(table, filter, order_by, page)?;
        let rows = query
            .build()
            .fetch_all(&mut *self.inner)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(decode_row).collect()
    }

    async fn count(&mut self, table: &str, filter: &Filter) -> Result<i64, StoreError> {
        let mut query = count_query(table, filter)?;
        query
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self.inner)
            .await
            .map_err(map_sqlx_error)
    }

    async fn insert(&mut self, table: &str, values: Record) -> Result<Record, StoreError> {
        let mut query = insert_query(table, values)?;
        let row = query
            .build()
            .fetch_one(&mut *self.inner)
            .await
            .map_err(map_sqlx_error)?;

        decode_row(&row)
    }

    async fn update(
        &mut self,
        table: &str,
        id_column: &str,
        id: Value,
        changes: Record,
    ) -> Result<Option<Record>, StoreError> {
        let mut query = update_query(table, id_column, id, changes)?;
        let row = query
            .build()
            .fetch_optional(&mut *self.inner)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn delete(
        &mut self,
        table: &str,
        id_column: &str,
        id: Value,
    ) -> Result<Option<Record>, StoreError> {
        let mut query = delete_query(table, id_column, id)?;
        let row = query
            .build()
            .fetch_optional(&mut *self.inner)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.inner.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.inner.rollback().await.map_err(map_sqlx_error)
    }
}

/// Maps SQLx failures to storage errors, keeping constraint violations
/// distinguishable.
pub fn map_sqlx_error(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        let constraint = db.constraint().map(str::to_string);
        if db.is_unique_violation() {
            return StoreError::UniqueViolation { constraint };
        }
        if db.is_foreign_key_violation() {
            return StoreError::ForeignKeyViolation { constraint };
        }
    }

    StoreError::Backend(Box::new(e))
}

fn push_ident(query: &mut Query, ident: &str) -> Result<(), StoreError> {
    let valid = !ident.is_empty()
        && !ident.starts_with(|c: char| c.is_ascii_digit())
        && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidIdentifier(ident.to_string()));
    }

    query.push("\"").push(ident).push("\"");
    Ok(())
}

fn push_value(query: &mut Query, value: Value) {
    match value {
        Value::Null => {
            query.push("NULL");
        }
        Value::Bool(v) => {
            query.push_bind(v);
        }
        Value::Int(v) => {
            query.push_bind(v);
        }
        Value::Text(v) => {
            query.push_bind(v);
        }
        Value::Uuid(v) => {
            query.push_bind(v);
        }
        Value::Timestamp(v) => {
            query.push_bind(v);
        }
    }
}

fn push_where(query: &mut Query, filter: &Filter) -> Result<(), StoreError> {
    for (i, (column, value)) in filter.iter().enumerate() {
        query.push(if i == 0 { " WHERE " } else { " AND " });
        push_ident(query, column)?;
        if value.is_null() {
            query.push(" IS NULL");
        } else {
            query.push(" = ");
            push_value(query, value.clone());
        }
    }
    Ok(())
}

fn select_query(
    table: &str,
    filter: &Filter,
    order_by: &str,
    page: Pagination,
) -> Result<Query, StoreError> {
    let mut query = Query::new("SELECT * FROM ");
    push_ident(&mut query, table)?;
    push_where(&mut query, filter)?;
    query.push(" ORDER BY ");
    push_ident(&mut query, order_by)?;
    query
        .push(" LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset);
    Ok(query)
}

fn count_query(table: &str, filter: &Filter) -> Result<Query, StoreError> {
    let mut query = Query::new("SELECT COUNT(*) FROM ");
    push_ident(&mut query, table)?;
    push_where(&mut query, filter)?;
    Ok(query)
}

fn insert_query(table: &str, values: Record) -> Result<Query, StoreError> {
    let mut query = Query::new("INSERT INTO ");
    push_ident(&mut query, table)?;

    if values.is_empty() {
        query.push(" DEFAULT VALUES RETURNING *");
        return Ok(query);
    }

    query.push(" (");
    for (i, column) in values.columns().enumerate() {
        if i > 0 {
            query.push(", ");
        }
        push_ident(&mut query, column)?;
    }
    query.push(") VALUES (");
    for (i, (_, value)) in values.into_iter().enumerate() {
        if i > 0 {
            query.push(", ");
        }
        push_value(&mut query, value);
    }
    query.push(") RETURNING *");
    Ok(query)
}

fn update_query(
    table: &str,
    id_column: &str,
    id: Value,
    changes: Record,
) -> Result<Query, StoreError> {
    let mut query = Query::new("UPDATE ");
    push_ident(&mut query, table)?;
    query.push(" SET ");
    for (i, (column, value)) in changes.into_iter().enumerate() {
        if i > 0 {
            query.push(", ");
        }
        push_ident(&mut query, &column)?;
        query.push(" = ");
        push_value(&mut query, value);
    }
    query.push(" WHERE ");
    push_ident(&mut query, id_column)?;
    query.push(" = ");
    push_value(&mut query, id);
    query.push(" RETURNING *");
    Ok(query)
}

fn delete_query(table: &str, id_column: &str, id: Value) -> Result<Query, StoreError> {
    let mut query = Query::new("DELETE FROM ");
    push_ident(&mut query, table)?;
    query.push(" WHERE ");
    push_ident(&mut query, id_column)?;
    query.push(" = ");
    push_value(&mut query, id);
    query.push(" RETURNING *");
    Ok(query)
}

fn decode_row(row: &PgRow) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())?;
        record.set(column.name(), value);
    }
    Ok(record)
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Result<Value, StoreError> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index).map(Value::from),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map(|v| Value::from(v.map(i64::from))),
        "INT4" => row.try_get::<Option<i32>, _>(index).map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(index).map(Value::from),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(index).map(Value::from)
        }
        "UUID" => row.try_get::<Option<Uuid>, _>(index).map(Value::from),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .map(Value::from),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .map(|v| Value::from(v.map(|t| t.and_utc()))),
        other => {
            return Err(StoreError::Backend(
                format!("unsupported column type {other} at index {index}").into(),
            ));
        }
    };

    value.map_err(map_sqlx_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_query_with_filter() {
        let filter = Filter::new()
            .eq("url_id", Uuid::new_v4())
            .eq("client", "10.0.0.1");

        let query = select_query("url_clicks", &filter, "id", Pagination::default()).unwrap();

        assert_eq!(
            query.sql(),
            r#"SELECT * FROM "url_clicks" WHERE "client" = $1 AND "url_id" = $2 ORDER BY "id" LIMIT $3 OFFSET $4"#
        );
    }

    #[test]
    fn test_select_query_without_filter() {
        let query = select_query("urls", &Filter::new(), "id", Pagination::new(10, 5)).unwrap();

        assert_eq!(
            query.sql(),
            r#"SELECT * FROM "urls" ORDER BY "id" LIMIT $1 OFFSET $2"#
        );
    }

    #[test]
    fn test_null_condition_uses_is_null() {
        let filter = Filter::new().eq("client", Value::Null);
        let query = count_query("url_clicks", &filter).unwrap();

        assert_eq!(
            query.sql(),
            r#"SELECT COUNT(*) FROM "url_clicks" WHERE "client" IS NULL"#
        );
    }

    #[test]
    fn test_insert_query() {
        let values = Record::new()
            .with("full_url", "https://example.com")
            .with("is_active", true);

        let query = insert_query("urls", values).unwrap();

        assert_eq!(
            query.sql(),
            r#"INSERT INTO "urls" ("full_url", "is_active") VALUES ($1, $2) RETURNING *"#
        );
    }

    #[test]
    fn test_insert_query_default_values() {
        let query = insert_query("url_clicks", Record::new()).unwrap();

        assert_eq!(
            query.sql(),
            r#"INSERT INTO "url_clicks" DEFAULT VALUES RETURNING *"#
        );
    }

    #[test]
    fn test_update_query() {
        let changes = Record::new().with("is_active", false);
        let query = update_query("urls", "id", Value::Uuid(Uuid::new_v4()), changes).unwrap();

        assert_eq!(
            query.sql(),
            r#"UPDATE "urls" SET "is_active" = $1 WHERE "id" = $2 RETURNING *"#
        );
    }

    #[test]
    fn test_delete_query() {
        let query = delete_query("url_clicks", "id", Value::Int(5)).unwrap();

        assert_eq!(
            query.sql(),
            r#"DELETE FROM "url_clicks" WHERE "id" = $1 RETURNING *"#
        );
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        for ident in ["", "urls; DROP TABLE urls", "a\"b", "1abc", "full url"] {
            let filter = Filter::new().eq(ident, 1i64);
            assert!(matches!(
                count_query("urls", &filter),
                Err(StoreError::InvalidIdentifier(_))
            ));
        }
    }
}
