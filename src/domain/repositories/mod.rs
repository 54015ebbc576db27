//! Data access for domain entities.
//!
//! A single generic [`Repository`] serves every entity implementing
//! [`crate::domain::entity::Entity`]. Storage is reached only through the
//! [`crate::domain::session::Session`] passed to each call, so the same
//! repository works against PostgreSQL and the in-memory backend.
//!
//! # Testing
//!
//! Unit tests drive the repository through `mockall` session mocks;
//! integration tests in `tests/repository_*.rs` use real backends.

pub mod repository;

pub use repository::Repository;
