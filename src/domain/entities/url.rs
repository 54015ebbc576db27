//! Url entity representing a shortened destination.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::entity::{CreateInput, Entity, UpdateInput};
use crate::domain::session::StoreError;
use crate::domain::value::{Record, ValueKind};

/// A shortened URL.
///
/// The identifier is generated by storage. `is_active` is toggled by
/// moderation; an inactive url refuses redirect resolution until it is
/// reactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Url {
    pub id: Uuid,
    pub full_url: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Url {
    pub fn new(id: Uuid, full_url: String, is_active: bool, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            full_url,
            is_active,
            created_at,
        }
    }
}

impl Entity for Url {
    type Id = Uuid;
    type Create = NewUrl;
    type Update = UrlPatch;

    const NAME: &'static str = "url";
    const TABLE: &'static str = "urls";
    const COLUMNS: &'static [(&'static str, ValueKind)] = &[
        ("id", ValueKind::Uuid),
        ("full_url", ValueKind::Text),
        ("is_active", ValueKind::Bool),
        ("created_at", ValueKind::Timestamp),
    ];

    fn id(&self) -> &Uuid {
        &self.id
    }

    fn from_record(mut record: Record) -> Result<Self, StoreError> {
        Ok(Self {
            id: record.take("id")?,
            full_url: record.take("full_url")?,
            is_active: record.take("is_active")?,
            created_at: record.take("created_at")?,
        })
    }
}

/// Input data for creating a new url.
#[derive(Debug, Clone)]
pub struct NewUrl {
    pub full_url: String,
    pub is_active: bool,
}

impl NewUrl {
    /// An active url pointing at `full_url`.
    pub fn active(full_url: impl Into<String>) -> Self {
        Self {
            full_url: full_url.into(),
            is_active: true,
        }
    }
}

impl CreateInput for NewUrl {
    fn into_record(self) -> Record {
        Record::new()
            .with("full_url", self.full_url)
            .with("is_active", self.is_active)
    }
}

/// Partial update for an existing url.
///
/// `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UrlPatch {
    pub full_url: Option<String>,
    pub is_active: Option<bool>,
}

impl UpdateInput for UrlPatch {
    fn into_changes(self) -> Record {
        let mut changes = Record::new();
        if let Some(full_url) = self.full_url {
            changes.set("full_url", full_url);
        }
        if let Some(is_active) = self.is_active {
            changes.set("is_active", is_active);
        }
        changes
    }
}
