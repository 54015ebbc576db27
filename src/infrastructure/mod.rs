//! Infrastructure layer for external integrations.
//!
//! Implements the storage contract defined in [`crate::domain::session`].
//!
//! # Modules
//!
//! - [`persistence`] - PostgreSQL and in-memory sessions

pub mod persistence;
