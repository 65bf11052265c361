//! Shared per-request state handed to every handler.

use crate::services::storage_service::StorageService;

/// Injected dependencies: the storage capability and the credential the
/// authorization predicate compares against. Cloned per request by axum.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub auth_token: String,
}
