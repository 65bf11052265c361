//! Defines routes for all object operations on the single fronted bucket.
//!
//! ## Structure
//! - `GET    /{filename}` — stream an object (single path segment)
//! - `GET    /{*path}`    — stream an object (nested or extensionless key)
//! - `PUT    /{filename}` — upload or replace an object
//! - `PATCH  /{filename}` — replace object metadata wholesale
//! - `DELETE /{filename}` — delete an object (idempotent)
//! - anything else        — 405 Method not allowed
//!
//! Both GET routes are adapters over the same read logic; the more specific
//! `/{filename}` wins for single-segment paths, the wildcard picks up the
//! rest. Handlers read the raw URI path themselves, so keys are percent-
//! decoded exactly once regardless of which route matched.

use crate::{
    handlers::object_handlers::{
        method_not_allowed, read_object, read_object_tree, remove_object, update_object_metadata,
        write_object,
    },
    state::AppState,
};
use axum::{Router, routing::get};

/// Build and return the router for the object façade.
///
/// The router carries shared state (`AppState`) to all handlers. Unmatched
/// methods land on the method-not-allowed fallback at every level, so no
/// request escapes the error taxonomy.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(read_object_tree).fallback(method_not_allowed))
        .route(
            "/{filename}",
            get(read_object)
                .put(write_object)
                .patch(update_object_metadata)
                .delete(remove_object)
                .fallback(method_not_allowed),
        )
        .route("/{*path}", get(read_object_tree).fallback(method_not_allowed))
        .fallback(method_not_allowed)
}
