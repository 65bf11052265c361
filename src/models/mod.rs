//! Core data model for the storage façade.
//!
//! A stored object maps cleanly to its database row via `sqlx::FromRow`
//! and serializes naturally as JSON via `serde`.

pub mod object;
