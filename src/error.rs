//! Error kinds surfaced by repositories and services.
//!
//! Expected outcomes (`NotFound`, `AlreadyExists`, `UrlBanned`, `Validation`)
//! are ordinary values meant to be mapped to client-facing responses.
//! `Internal` is the fatal channel for storage failures the caller cannot fix.

use serde::Serialize;
use serde_json::{Value, json};

use crate::domain::session::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Validation { message: String, details: Value },

    #[error("{message}")]
    NotFound { message: String, details: Value },

    #[error("{message}")]
    AlreadyExists { message: String, details: Value },

    #[error("{message}")]
    UrlBanned { message: String, details: Value },

    #[error("{message}")]
    Internal { message: String, details: Value },
}

/// Serializable view of an [`AppError`], used for structured output.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub code: &'static str,
    pub message: &'a str,
    pub details: &'a Value,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }
    pub fn not_found(message: impl Into<String>, details: Value) -> Self {
        Self::NotFound {
            message: message.into(),
            details,
        }
    }
    pub fn already_exists(message: impl Into<String>, details: Value) -> Self {
        Self::AlreadyExists {
            message: message.into(),
            details,
        }
    }
    pub fn url_banned(message: impl Into<String>, details: Value) -> Self {
        Self::UrlBanned {
            message: message.into(),
            details,
        }
    }
    pub fn internal(message: impl Into<String>, details: Value) -> Self {
        Self::Internal {
            message: message.into(),
            details,
        }
    }

    /// Stable machine-readable code of the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation_error",
            AppError::NotFound { .. } => "not_found",
            AppError::AlreadyExists { .. } => "already_exists",
            AppError::UrlBanned { .. } => "url_banned",
            AppError::Internal { .. } => "internal_error",
        }
    }

    /// True only for storage failures; every other kind is an expected outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Internal { .. })
    }

    pub fn details(&self) -> &Value {
        match self {
            AppError::Validation { details, .. }
            | AppError::NotFound { details, .. }
            | AppError::AlreadyExists { details, .. }
            | AppError::UrlBanned { details, .. }
            | AppError::Internal { details, .. } => details,
        }
    }

    pub fn body(&self) -> ErrorBody<'_> {
        let message = match self {
            AppError::Validation { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::AlreadyExists { message, .. }
            | AppError::UrlBanned { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        };

        ErrorBody {
            code: self.code(),
            message,
            details: self.details(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation { constraint } => AppError::already_exists(
                "Unique constraint violation",
                json!({ "constraint": constraint }),
            ),
            StoreError::ForeignKeyViolation { constraint } => AppError::bad_request(
                "Referenced row does not exist",
                json!({ "constraint": constraint }),
            ),
            other => {
                tracing::error!(error = %other, "storage failure");
                AppError::internal("Database error", json!({ "reason": other.to_string() }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_maps_to_already_exists() {
        let err: AppError = StoreError::UniqueViolation {
            constraint: Some("urls_full_url_key".to_string()),
        }
        .into();

        assert!(matches!(err, AppError::AlreadyExists { .. }));
        assert_eq!(err.code(), "already_exists");
        assert_eq!(err.details()["constraint"], "urls_full_url_key");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_foreign_key_violation_maps_to_validation() {
        let err: AppError = StoreError::ForeignKeyViolation { constraint: None }.into();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_backend_failure_is_fatal() {
        let err: AppError = StoreError::UnknownTable("ghosts".to_string()).into();

        assert!(matches!(err, AppError::Internal { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_body_serialization() {
        let err = AppError::url_banned("Url is banned", json!({ "id": 1 }));
        let body = serde_json::to_value(err.body()).unwrap();

        assert_eq!(body["code"], "url_banned");
        assert_eq!(body["message"], "Url is banned");
        assert_eq!(body["details"]["id"], 1);
    }
}
