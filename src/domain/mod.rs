//! Domain layer containing entities, the storage contract and data access.
//!
//! # Architecture
//!
//! - [`value`] - Attribute values and records exchanged with storage
//! - [`entity`] - Capability contract every persisted entity implements
//! - [`filter`] - Validated equality filters and pagination
//! - [`session`] - Transactional storage session contract
//! - [`entities`] - The `Url` and `Click` entities
//! - [`repositories`] - Generic CRUD repository
//!
//! # Design Principles
//!
//! - Domain layer has no dependencies on concrete storage backends
//! - Backends implement [`session::Session`] in the infrastructure layer
//! - Business rules live in services (see [`crate::application::services`])

pub mod entities;
pub mod entity;
pub mod filter;
pub mod repositories;
pub mod session;
pub mod value;
