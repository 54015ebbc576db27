//! Click entity representing a single redirect event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::entity::{CreateInput, Entity, UpdateInput};
use crate::domain::session::StoreError;
use crate::domain::value::{Record, ValueKind};

/// A click recorded when a url is resolved.
///
/// `url_id` is a lookup-only reference; clicks never own the url's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Click {
    pub id: i64,
    pub url_id: Uuid,
    pub client: String,
    pub clicked_at: DateTime<Utc>,
}

impl Click {
    pub fn new(id: i64, url_id: Uuid, client: String, clicked_at: DateTime<Utc>) -> Self {
        Self {
            id,
            url_id,
            client,
            clicked_at,
        }
    }
}

impl Entity for Click {
    type Id = i64;
    type Create = NewClick;
    type Update = ClickPatch;

    const NAME: &'static str = "click";
    const TABLE: &'static str = "url_clicks";
    const COLUMNS: &'static [(&'static str, ValueKind)] = &[
        ("id", ValueKind::Int),
        ("url_id", ValueKind::Uuid),
        ("client", ValueKind::Text),
        ("clicked_at", ValueKind::Timestamp),
    ];

    fn id(&self) -> &i64 {
        &self.id
    }

    fn from_record(mut record: Record) -> Result<Self, StoreError> {
        Ok(Self {
            id: record.take("id")?,
            url_id: record.take("url_id")?,
            client: record.take("client")?,
            clicked_at: record.take("clicked_at")?,
        })
    }
}

/// Input data for recording a click.
///
/// The timestamp is set by storage.
#[derive(Debug, Clone)]
pub struct NewClick {
    pub url_id: Uuid,
    pub client: String,
}

impl CreateInput for NewClick {
    fn into_record(self) -> Record {
        Record::new()
            .with("url_id", self.url_id)
            .with("client", self.client)
    }
}

/// Partial update for a click. Clicks are immutable in normal operation; this
/// exists so the generic repository is complete for the click collection.
#[derive(Debug, Clone, Default)]
pub struct ClickPatch {
    pub client: Option<String>,
}

impl UpdateInput for ClickPatch {
    fn into_changes(self) -> Record {
        let mut changes = Record::new();
        if let Some(client) = self.client {
            changes.set("client", client);
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_from_record() {
        let url_id = Uuid::new_v4();
        let now = Utc::now();
        let record = Record::new()
            .with("id", 7i64)
            .with("url_id", url_id)
            .with("client", "192.168.1.1")
            .with("clicked_at", now);

        let click = Click::from_record(record).unwrap();

        assert_eq!(click, Click::new(7, url_id, "192.168.1.1".into(), now));
    }

    #[test]
    fn test_new_click_record() {
        let url_id = Uuid::new_v4();
        let record = NewClick {
            url_id,
            client: "10.0.0.1".to_string(),
        }
        .into_record();

        assert_eq!(record.len(), 2);
        assert!(!record.contains("id"));
        assert!(!record.contains("clicked_at"));
    }
}
