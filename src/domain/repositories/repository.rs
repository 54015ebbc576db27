//! Generic transactional repository over one entity collection.

use serde_json::json;
use std::marker::PhantomData;
use tracing::{debug, warn};

use crate::domain::entity::{CreateInput, Entity, UpdateInput};
use crate::domain::filter::{Filter, Pagination, check_attributes};
use crate::domain::session::{Session, StoreError, Transaction};
use crate::domain::value::Record;
use crate::error::AppError;

/// Uniform CRUD over the collection of `E`.
///
/// The repository is stateless: it caches nothing and owns no connection.
/// Every method opens its own transaction on the given session and finishes it
/// before returning, committing on success and rolling back on any failure.
/// Callers composing several calls must treat each one as already durable;
/// there is no atomicity across calls.
///
/// # Errors
///
/// - [`AppError::NotFound`] - no row with the requested identifier
/// - [`AppError::AlreadyExists`] - an insert violated a uniqueness constraint
/// - [`AppError::Validation`] - unknown attribute, negative pagination, or a
///   write that references a missing row
/// - [`AppError::Internal`] - storage failure
pub struct Repository<E: Entity> {
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Repository<E> {
    pub const fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }

    /// Fetches the row identified by `id`.
    pub async fn get<S: Session>(&self, session: &S, id: &E::Id) -> Result<E, AppError> {
        let mut tx = session.begin().await?;
        let outcome = fetch_one::<E, _>(&mut tx, id).await;
        finish::<E, _, _>(tx, outcome).await
    }

    /// Returns true if a row with `id` exists.
    pub async fn exists<S: Session>(&self, session: &S, id: &E::Id) -> Result<bool, AppError> {
        match self.get(session, id).await {
            Ok(_) => Ok(true),
            Err(AppError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetches rows matching every condition of `filter`, ordered by
    /// [`Entity::ORDER_BY`] and sliced by `page`.
    ///
    /// No match is an empty vector, never an error.
    pub async fn filter<S: Session>(
        &self,
        session: &S,
        filter: &Filter,
        page: Pagination,
    ) -> Result<Vec<E>, AppError> {
        filter.validate::<E>()?;
        page.validate()?;

        let mut tx = session.begin().await?;
        let outcome = fetch_many::<E, _>(&mut tx, filter, page).await;
        finish::<E, _, _>(tx, outcome).await
    }

    /// Counts rows matching every condition of `filter`.
    pub async fn count<S: Session>(&self, session: &S, filter: &Filter) -> Result<i64, AppError> {
        filter.validate::<E>()?;

        let mut tx = session.begin().await?;
        let outcome = tx.count(E::TABLE, filter).await.map_err(AppError::from);
        finish::<E, _, _>(tx, outcome).await
    }

    /// Inserts one row and returns it as stored, identifier included.
    pub async fn create<S: Session>(&self, session: &S, input: E::Create) -> Result<E, AppError> {
        let values = checked_create_values::<E>(input)?;

        let mut tx = session.begin().await?;
        let outcome = insert_one::<E, _>(&mut tx, values).await;
        let created = finish::<E, _, _>(tx, outcome).await?;

        debug!(entity = E::NAME, id = %created.id(), "created");
        Ok(created)
    }

    /// Inserts every input in one transaction: all rows are persisted or none.
    pub async fn bulk_create<S: Session>(
        &self,
        session: &S,
        inputs: Vec<E::Create>,
    ) -> Result<Vec<E>, AppError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let values = inputs
            .into_iter()
            .map(checked_create_values::<E>)
            .collect::<Result<Vec<_>, _>>()?;
        let total = values.len();

        let mut tx = session.begin().await?;
        let outcome = insert_all::<E, _>(&mut tx, values).await;
        let created = finish::<E, _, _>(tx, outcome).await?;

        debug!(entity = E::NAME, total, "bulk created");
        Ok(created)
    }

    /// Applies `input` to the row identified by `id` and returns the result.
    ///
    /// Never creates a row. An input without changes writes nothing and
    /// returns the current row.
    pub async fn update<S: Session>(
        &self,
        session: &S,
        id: &E::Id,
        input: E::Update,
    ) -> Result<E, AppError> {
        let changes = input.into_changes();
        check_attributes::<E>(changes.iter())?;
        if changes.contains(E::ID_COLUMN) {
            return Err(AppError::bad_request(
                format!("The {} identifier cannot be changed", E::NAME),
                json!({ "id": id.to_string() }),
            ));
        }

        let mut tx = session.begin().await?;
        let outcome = update_one::<E, _>(&mut tx, id, changes).await;
        finish::<E, _, _>(tx, outcome).await
    }

    /// Removes the row identified by `id` and returns it as it was
    /// immediately before deletion.
    pub async fn delete<S: Session>(&self, session: &S, id: &E::Id) -> Result<E, AppError> {
        let mut tx = session.begin().await?;
        let outcome = delete_one::<E, _>(&mut tx, id).await;
        let deleted = finish::<E, _, _>(tx, outcome).await?;

        debug!(entity = E::NAME, %id, "deleted");
        Ok(deleted)
    }
}

impl<E: Entity> Default for Repository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<E: Entity> std::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").field("entity", &E::NAME).finish()
    }
}

/// Commits on success and rolls back on failure. A failed rollback is logged
/// and the original error is returned.
async fn finish<E: Entity, T, Tx: Transaction>(
    tx: Tx,
    outcome: Result<T, AppError>,
) -> Result<T, AppError> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            debug!(entity = E::NAME, "transaction committed");
            Ok(value)
        }
        Err(e) => {
            match tx.rollback().await {
                Ok(()) => debug!(entity = E::NAME, code = e.code(), "transaction rolled back"),
                Err(rollback_error) => {
                    warn!(entity = E::NAME, error = %rollback_error, "transaction rollback failed")
                }
            }
            Err(e)
        }
    }
}

fn not_found<E: Entity>(id: &E::Id) -> AppError {
    AppError::not_found(
        format!("{} not found", E::NAME),
        json!({ "entity": E::NAME, "id": id.to_string() }),
    )
}

fn checked_create_values<E: Entity>(input: E::Create) -> Result<Record, AppError> {
    let values = input.into_record();
    check_attributes::<E>(values.iter())?;
    Ok(values)
}

fn id_filter<E: Entity>(id: &E::Id) -> Filter {
    Filter::new().eq(E::ID_COLUMN, id.clone())
}

async fn fetch_one<E: Entity, Tx: Transaction>(tx: &mut Tx, id: &E::Id) -> Result<E, AppError> {
    let mut rows = tx
        .select(E::TABLE, &id_filter::<E>(id), E::ORDER_BY, Pagination::single())
        .await?;

    match rows.pop() {
        Some(row) => Ok(E::from_record(row)?),
        None => Err(not_found::<E>(id)),
    }
}

async fn fetch_many<E: Entity, Tx: Transaction>(
    tx: &mut Tx,
    filter: &Filter,
    page: Pagination,
) -> Result<Vec<E>, AppError> {
    let rows = tx.select(E::TABLE, filter, E::ORDER_BY, page).await?;

    rows.into_iter()
        .map(|row| E::from_record(row).map_err(AppError::from))
        .collect()
}

async fn insert_one<E: Entity, Tx: Transaction>(
    tx: &mut Tx,
    values: Record,
) -> Result<E, AppError> {
    match tx.insert(E::TABLE, values).await {
        Ok(row) => Ok(E::from_record(row)?),
        Err(StoreError::UniqueViolation { constraint }) => Err(AppError::already_exists(
            format!("{} already exists", E::NAME),
            json!({ "entity": E::NAME, "constraint": constraint }),
        )),
        Err(e) => Err(e.into()),
    }
}

async fn insert_all<E: Entity, Tx: Transaction>(
    tx: &mut Tx,
    values: Vec<Record>,
) -> Result<Vec<E>, AppError> {
    let mut created = Vec::with_capacity(values.len());
    for row in values {
        created.push(insert_one::<E, _>(tx, row).await?);
    }
    Ok(created)
}

async fn update_one<E: Entity, Tx: Transaction>(
    tx: &mut Tx,
    id: &E::Id,
    changes: Record,
) -> Result<E, AppError> {
    if changes.is_empty() {
        return fetch_one::<E, _>(tx, id).await;
    }

    let row = tx
        .update(E::TABLE, E::ID_COLUMN, id.clone().into(), changes)
        .await
        .map_err(|e| match e {
            StoreError::UniqueViolation { constraint } => AppError::already_exists(
                format!("{} already exists", E::NAME),
                json!({ "entity": E::NAME, "constraint": constraint }),
            ),
            other => other.into(),
        })?;

    match row {
        Some(row) => Ok(E::from_record(row)?),
        None => Err(not_found::<E>(id)),
    }
}

async fn delete_one<E: Entity, Tx: Transaction>(tx: &mut Tx, id: &E::Id) -> Result<E, AppError> {
    match tx.delete(E::TABLE, E::ID_COLUMN, id.clone().into()).await? {
        Some(row) => Ok(E::from_record(row)?),
        None => Err(not_found::<E>(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Click, NewClick, NewUrl, Url, UrlPatch};
    use crate::domain::session::{MockSession, MockTransaction};
    use crate::domain::value::{Value, ValueKind};
    use chrono::Utc;
    use std::io;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn url_record(id: Uuid, full_url: &str, is_active: bool) -> Record {
        Record::new()
            .with("id", id)
            .with("full_url", full_url)
            .with("is_active", is_active)
            .with("created_at", Utc::now())
    }

    fn session_with(tx: MockTransaction) -> MockSession {
        let mut session = MockSession::new();
        session.expect_begin().times(1).return_once(move || Ok(tx));
        session
    }

    fn expect_commit(tx: &mut MockTransaction) {
        tx.expect_commit().times(1).returning(|| Ok(()));
        tx.expect_rollback().never();
    }

    fn expect_rollback(tx: &mut MockTransaction) {
        tx.expect_rollback().times(1).returning(|| Ok(()));
        tx.expect_commit().never();
    }

    #[tokio::test]
    async fn test_get_commits_on_success() {
        let id = Uuid::new_v4();
        let mut tx = MockTransaction::new();
        tx.expect_select()
            .withf(move |table, filter, order_by, page| {
                table == "urls"
                    && filter.get("id") == Some(&Value::Uuid(id))
                    && order_by == "id"
                    && *page == Pagination::single()
            })
            .times(1)
            .returning(move |_, _, _, _| Ok(vec![url_record(id, "https://example.com", true)]));
        expect_commit(&mut tx);

        let session = session_with(tx);
        let url = Repository::<Url>::new().get(&session, &id).await.unwrap();

        assert_eq!(url.id, id);
        assert_eq!(url.full_url, "https://example.com");
    }

    #[tokio::test]
    async fn test_get_missing_rolls_back() {
        let mut tx = MockTransaction::new();
        tx.expect_select().returning(|_, _, _, _| Ok(vec![]));
        expect_rollback(&mut tx);

        let session = session_with(tx);
        let result = Repository::<Url>::new().get(&session, &Uuid::new_v4()).await;

        assert!(matches!(result.unwrap_err(), AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_create_unique_violation_rolls_back() {
        let mut tx = MockTransaction::new();
        tx.expect_insert().times(1).returning(|_, _| {
            Err(StoreError::UniqueViolation {
                constraint: Some("urls_full_url_key".to_string()),
            })
        });
        expect_rollback(&mut tx);

        let session = session_with(tx);
        let result = Repository::<Url>::new()
            .create(&session, NewUrl::active("https://example.com"))
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists { .. }));
        assert_eq!(err.details()["constraint"], "urls_full_url_key");
    }

    #[tokio::test]
    async fn test_bulk_create_failure_rolls_back_whole_batch() {
        let mut tx = MockTransaction::new();
        let mut calls = 0;
        tx.expect_insert().times(2).returning(move |_, values| {
            calls += 1;
            if calls == 2 {
                return Err(StoreError::UniqueViolation { constraint: None });
            }
            let mut row = values;
            row.set("id", Uuid::new_v4());
            row.set("created_at", Utc::now());
            Ok(row)
        });
        expect_rollback(&mut tx);

        let session = session_with(tx);
        let result = Repository::<Url>::new()
            .bulk_create(
                &session,
                vec![
                    NewUrl::active("https://a.example"),
                    NewUrl::active("https://a.example"),
                    NewUrl::active("https://b.example"),
                ],
            )
            .await;

        assert!(matches!(result.unwrap_err(), AppError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_bulk_create_empty_opens_no_transaction() {
        let mut session = MockSession::new();
        session.expect_begin().never();

        let created = Repository::<Url>::new()
            .bulk_create(&session, vec![])
            .await
            .unwrap();

        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn test_filter_unknown_attribute_opens_no_transaction() {
        let mut session = MockSession::new();
        session.expect_begin().never();

        let filter = Filter::new().eq("referer", "https://google.com");
        let result = Repository::<Click>::new()
            .filter(&session, &filter, Pagination::default())
            .await;

        assert!(matches!(result.unwrap_err(), AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_rolls_back() {
        let mut tx = MockTransaction::new();
        tx.expect_update()
            .withf(|table, id_column, _, changes| {
                table == "urls" && id_column == "id" && changes.contains("is_active")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(None));
        expect_rollback(&mut tx);

        let session = session_with(tx);
        let patch = UrlPatch {
            is_active: Some(false),
            ..Default::default()
        };
        let result = Repository::<Url>::new()
            .update(&session, &Uuid::new_v4(), patch)
            .await;

        assert!(matches!(result.unwrap_err(), AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_without_changes_reads_current_row() {
        let id = Uuid::new_v4();
        let mut tx = MockTransaction::new();
        tx.expect_update().never();
        tx.expect_select()
            .times(1)
            .returning(move |_, _, _, _| Ok(vec![url_record(id, "https://example.com", false)]));
        expect_commit(&mut tx);

        let session = session_with(tx);
        let url = Repository::<Url>::new()
            .update(&session, &id, UrlPatch::default())
            .await
            .unwrap();

        assert!(!url.is_active);
    }

    #[tokio::test]
    async fn test_delete_returns_removed_row() {
        let id = Uuid::new_v4();
        let mut tx = MockTransaction::new();
        tx.expect_delete()
            .withf(move |table, _, key| table == "urls" && *key == Value::Uuid(id))
            .times(1)
            .returning(move |_, _, _| Ok(Some(url_record(id, "https://gone.example", true))));
        expect_commit(&mut tx);

        let session = session_with(tx);
        let deleted = Repository::<Url>::new().delete(&session, &id).await.unwrap();

        assert_eq!(deleted.full_url, "https://gone.example");
    }

    #[tokio::test]
    async fn test_foreign_key_violation_is_validation_error() {
        let mut tx = MockTransaction::new();
        tx.expect_insert()
            .returning(|_, _| Err(StoreError::ForeignKeyViolation { constraint: None }));
        expect_rollback(&mut tx);

        let session = session_with(tx);
        let result = Repository::<Click>::new()
            .create(
                &session,
                NewClick {
                    url_id: Uuid::new_v4(),
                    client: "127.0.0.1".to_string(),
                },
            )
            .await;

        assert!(matches!(result.unwrap_err(), AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_rollback_failure_keeps_original_error() {
        let mut tx = MockTransaction::new();
        tx.expect_delete().returning(|_, _, _| Ok(None));
        tx.expect_rollback()
            .times(1)
            .returning(|| Err(StoreError::UnknownTable("urls".to_string())));
        tx.expect_commit().never();

        let session = session_with(tx);
        let result = Repository::<Url>::new()
            .delete(&session, &Uuid::new_v4())
            .await;

        assert!(matches!(result.unwrap_err(), AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_begin_failure_is_fatal() {
        let mut session = MockSession::new();
        session.expect_begin().times(1).returning(|| {
            Err(StoreError::Backend(Box::new(std::io::Error::other(
                "connection refused",
            ))))
        });

        let result = Repository::<Url>::new().get(&session, &Uuid::new_v4()).await;

        assert!(result.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_mistyped_filter_opens_no_transaction() {
        let mut session = MockSession::new();
        session.expect_begin().never();

        let filter = Filter::new().eq("is_active", "true");
        let result = Repository::<Url>::new()
            .filter(&session, &filter, Pagination::default())
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(err.details()["expected"], "bool");
    }

    #[derive(Debug, Clone)]
    struct Tag {
        id: i64,
    }

    struct NewTag;

    struct Renumber(i64);

    impl CreateInput for NewTag {
        fn into_record(self) -> Record {
            Record::new()
        }
    }

    impl UpdateInput for Renumber {
        fn into_changes(self) -> Record {
            Record::new().with("id", self.0)
        }
    }

    impl Entity for Tag {
        type Id = i64;
        type Create = NewTag;
        type Update = Renumber;

        const NAME: &'static str = "tag";
        const TABLE: &'static str = "tags";
        const COLUMNS: &'static [(&'static str, ValueKind)] = &[("id", ValueKind::Int)];

        fn id(&self) -> &i64 {
            &self.id
        }

        fn from_record(mut record: Record) -> Result<Self, StoreError> {
            Ok(Self {
                id: record.take("id")?,
            })
        }
    }

    #[tokio::test]
    async fn test_update_of_identifier_is_rejected() {
        let mut session = MockSession::new();
        session.expect_begin().never();

        let result = Repository::<Tag>::new()
            .update(&session, &1, Renumber(2))
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(err.to_string(), "The tag identifier cannot be changed");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }

        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(tracing::Level::DEBUG)
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .finish();
            tracing::subscriber::set_default(subscriber)
        }
    }

    #[tokio::test]
    async fn test_transaction_outcomes_are_logged() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let id = Uuid::new_v4();

        let mut tx = MockTransaction::new();
        tx.expect_select()
            .returning(move |_, _, _, _| Ok(vec![url_record(id, "https://example.com", true)]));
        expect_commit(&mut tx);
        Repository::<Url>::new()
            .get(&session_with(tx), &id)
            .await
            .unwrap();

        let mut tx = MockTransaction::new();
        tx.expect_select().returning(|_, _, _, _| Ok(Vec::new()));
        expect_rollback(&mut tx);
        Repository::<Url>::new()
            .get(&session_with(tx), &id)
            .await
            .unwrap_err();

        let output = logs.contents();
        assert!(output.contains("transaction committed"), "{output}");
        assert!(output.contains("transaction rolled back"), "{output}");
    }
}
