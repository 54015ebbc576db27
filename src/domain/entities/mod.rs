//! Core domain entities of the shortener.
//!
//! # Entity Types
//!
//! - [`Url`] - A shortened destination with an active flag
//! - [`Click`] - One recorded redirect of a url
//!
//! # Design Pattern
//!
//! Each entity has separate input structs implementing the
//! [`crate::domain::entity`] contract:
//! - `NewUrl`, `NewClick` - For creating new rows
//! - `UrlPatch`, `ClickPatch` - For partial updates

pub mod click;
pub mod url;

pub use click::{Click, ClickPatch, NewClick};
pub use url::{NewUrl, Url, UrlPatch};
