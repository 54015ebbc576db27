//! Redirect resolution and click analytics service.

use serde::Serialize;
use serde_json::json;
use std::str::FromStr;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::entities::{Click, NewClick, NewUrl, Url, UrlPatch};
use crate::domain::filter::{Filter, Pagination};
use crate::domain::repositories::Repository;
use crate::domain::session::Session;
use crate::error::AppError;

/// What happens when recording a click fails during redirect resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClickRecording {
    /// The failure is returned and the redirect fails with it.
    #[default]
    Strict,
    /// The failure is logged and the destination is still returned.
    BestEffort,
}

impl FromStr for ClickRecording {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "best_effort" | "best-effort" => Ok(Self::BestEffort),
            other => Err(format!(
                "unknown click recording policy '{other}' (expected 'strict' or 'best_effort')"
            )),
        }
    }
}

/// Clicks attached to a status lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClickSummary {
    /// Number of clicks recorded for the url.
    Count(i64),
    /// The matching click records.
    Items(Vec<Click>),
}

/// A url together with its click summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlStatus {
    pub url: Url,
    pub clicks: ClickSummary,
}

/// Service composing the url and click repositories into shortener operations.
///
/// Each repository call runs in its own transaction. Between reading a url and
/// recording its click a concurrent moderator may deactivate it; the click is
/// still recorded in that case.
#[derive(Debug, Clone, Default)]
pub struct UrlService {
    urls: Repository<Url>,
    clicks: Repository<Click>,
    click_recording: ClickRecording,
}

impl UrlService {
    /// Creates a new url service.
    pub fn new(click_recording: ClickRecording) -> Self {
        Self {
            urls: Repository::new(),
            clicks: Repository::new(),
            click_recording,
        }
    }

    /// Generic operations over the url collection.
    pub fn urls(&self) -> &Repository<Url> {
        &self.urls
    }

    /// Generic operations over the click collection.
    pub fn clicks(&self) -> &Repository<Click> {
        &self.clicks
    }

    pub fn click_recording(&self) -> ClickRecording {
        self.click_recording
    }

    /// Creates an active url for `full_url`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if `full_url` is not an absolute
    /// http(s) URL.
    /// Returns [`AppError::AlreadyExists`] if the destination is already shortened.
    #[instrument(skip(self, session))]
    pub async fn shorten<S: Session>(&self, session: &S, full_url: &str) -> Result<Url, AppError> {
        validate_destination(full_url)?;

        let url = self
            .urls
            .create(session, NewUrl::active(full_url))
            .await?;

        info!(url_id = %url.id, "url shortened");
        Ok(url)
    }

    /// Resolves `url_id` to its destination and records a click for `client`.
    ///
    /// The stored destination is returned exactly as persisted.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the url does not exist.
    /// Returns [`AppError::UrlBanned`] if the url is inactive; no click is
    /// recorded then.
    /// Under [`ClickRecording::Strict`], any click recording failure is returned
    /// unchanged.
    #[instrument(skip(self, session))]
    pub async fn resolve_redirect<S: Session>(
        &self,
        session: &S,
        client: &str,
        url_id: Uuid,
    ) -> Result<String, AppError> {
        let url = self.urls.get(session, &url_id).await?;

        if !url.is_active {
            metrics::counter!("redirects_banned_total").increment(1);
            return Err(AppError::url_banned(
                "Url is banned",
                json!({ "url_id": url_id }),
            ));
        }

        let new_click = NewClick {
            url_id: url.id,
            client: client.to_string(),
        };

        if let Err(e) = self.clicks.create(session, new_click).await {
            metrics::counter!("click_record_failures_total").increment(1);
            match self.click_recording {
                ClickRecording::Strict => return Err(e),
                ClickRecording::BestEffort => {
                    warn!(%url_id, error = %e, code = e.code(), "click not recorded");
                }
            }
        }

        metrics::counter!("redirects_total").increment(1);
        Ok(url.full_url)
    }

    /// Returns the url with either its click count or its click records.
    ///
    /// With `full_info`, clicks are filtered by `url_id` plus every condition
    /// of `filter` and sliced by `page`; the `url_id` scope overrides any
    /// caller-supplied `url_id`. Without `full_info`, only the total number of
    /// clicks for the url is returned and `filter`/`page` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the url does not exist.
    /// Returns [`AppError::Validation`] if `filter` names an unknown attribute.
    #[instrument(skip(self, session))]
    pub async fn get_status<S: Session>(
        &self,
        session: &S,
        url_id: Uuid,
        full_info: bool,
        filter: Filter,
        page: Pagination,
    ) -> Result<UrlStatus, AppError> {
        let url = self.urls.get(session, &url_id).await?;

        let clicks = if full_info {
            let scoped = filter.scoped("url_id", url.id);
            ClickSummary::Items(self.clicks.filter(session, &scoped, page).await?)
        } else {
            let scoped = Filter::new().eq("url_id", url.id);
            ClickSummary::Count(self.clicks.count(session, &scoped).await?)
        };

        Ok(UrlStatus { url, clicks })
    }

    /// Activates or deactivates a url.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the url does not exist.
    #[instrument(skip(self, session))]
    pub async fn set_active<S: Session>(
        &self,
        session: &S,
        url_id: Uuid,
        active: bool,
    ) -> Result<Url, AppError> {
        let patch = UrlPatch {
            is_active: Some(active),
            ..Default::default()
        };
        let url = self.urls.update(session, &url_id, patch).await?;

        info!(%url_id, active, "url moderation state changed");
        Ok(url)
    }
}

/// Accepts only absolute http(s) URLs with a host.
fn validate_destination(full_url: &str) -> Result<(), AppError> {
    let parsed = url::Url::parse(full_url).map_err(|e| {
        AppError::bad_request("Invalid URL format", json!({ "reason": e.to_string() }))
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::bad_request(
            "Only HTTP and HTTPS protocols are allowed",
            json!({ "scheme": parsed.scheme() }),
        ));
    }

    if parsed.host_str().is_none() {
        return Err(AppError::bad_request(
            "URL must have a host",
            json!({ "url": full_url }),
        ));
    }

    Ok(())
}
