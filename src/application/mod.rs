//! Application layer services implementing business logic.
//!
//! Services compose generic repository calls with business rules. They borrow
//! the storage session per call and hold no state besides their policies.
//!
//! # Available Services
//!
//! - [`services::url_service::UrlService`] - Redirect resolution, click tracking
//!   and url moderation

pub mod services;
