//! HTTP handlers for the four object operations.
//!
//! Streams object bodies in both directions to avoid buffering in memory
//! and delegates storage concerns to `StorageService`. The single-segment
//! and catch-all read routes are thin adapters over one shared function;
//! both hand the still-encoded URI path to the key normalizer, so percent
//! decoding happens exactly once per request.

use crate::{
    auth,
    errors::AppError,
    mapping::{
        FALLBACK_CONTENT_TYPE, RENDER_KEY, RENDER_TEXT, collect_object_metadata, normalize_key,
        resolve_content_type,
    },
    services::storage_service::StorageError,
    state::AppState,
};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::{io, time::SystemTime};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// GET `/{filename}` — stream a single-segment object.
pub async fn read_object(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, AppError> {
    object_response(&state, &headers, uri.path()).await
}

/// GET `/{*path}` — stream any nested or extensionless object.
pub async fn read_object_tree(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, AppError> {
    object_response(&state, &headers, uri.path()).await
}

/// Shared read path behind both GET routes.
///
/// Every storage failure collapses to 404 here, and so does a denied read
/// of a private object, so existence never leaks.
async fn object_response(
    state: &AppState,
    headers: &HeaderMap,
    raw_path: &str,
) -> Result<Response, AppError> {
    let key = normalize_key(raw_path).ok_or_else(|| AppError::not_found("no such object"))?;

    let (meta, file) = state.storage.get_object_reader(&key).await.map_err(|err| {
        debug!(key = %key, %err, "read failed");
        AppError::not_found(format!("object `{key}` not found"))
    })?;

    let metadata = meta.metadata_map();
    let mut resp_headers = HeaderMap::new();
    for (name, value) in &metadata {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            resp_headers.insert(name, value);
        }
    }

    let force_text = metadata.get(RENDER_KEY).is_some_and(|v| v == RENDER_TEXT);
    let resolved = resolve_content_type(meta.content_type.as_deref(), &key, force_text);
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&resolved)
            .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE)),
    );

    resp_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    let last_modified = httpdate::fmt_http_date(SystemTime::from(meta.last_modified));
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        resp_headers.insert(header::LAST_MODIFIED, value);
    }
    let quoted_etag = format!("\"{}\"", meta.etag);
    if let Ok(value) = HeaderValue::from_str(&quoted_etag) {
        resp_headers.insert(header::ETAG, value);
    }

    // The gate runs against the visibility entry projected above; on denial
    // the opened payload is dropped without being read.
    if !auth::read_permitted(&metadata, headers, &state.auth_token) {
        return Err(AppError::not_found(format!("object `{key}` not found")));
    }

    let disposition = format!("inline; filename=\"{key}\"");
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        resp_headers.insert(header::CONTENT_DISPOSITION, value);
    }

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.headers_mut() = resp_headers;
    Ok(response)
}

/// PUT `/{filename}` — stream the request body into a new or replaced
/// object, carrying every `x-store-*` header along as metadata.
pub async fn write_object(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    if !auth::authorized(&headers, &state.auth_token) {
        return Err(AppError::unauthorized());
    }
    let key = normalize_key(uri.path()).ok_or_else(|| AppError::not_found("empty object key"))?;

    let metadata = collect_object_metadata(&headers);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));

    let stored = state
        .storage
        .put_object_stream(&key, content_type, &metadata, stream)
        .await?;

    info!(key = %key, size = stored.size_bytes, "object written");
    Ok((StatusCode::OK, "OK"))
}

/// PATCH `/{filename}` — replace object metadata wholesale via a same-key
/// copy; content is carried over unchanged.
pub async fn update_object_metadata(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    if !auth::authorized(&headers, &state.auth_token) {
        return Err(AppError::unauthorized());
    }
    let key = normalize_key(uri.path()).ok_or_else(|| AppError::not_found("empty object key"))?;

    let metadata = collect_object_metadata(&headers);
    match state.storage.replace_metadata(&key, &metadata).await {
        Ok(_) => {
            info!(key = %key, entries = metadata.len(), "object metadata replaced");
            Ok((StatusCode::OK, "OK"))
        }
        // No implicit creation: a missing copy source is a server-side
        // failure, not a 404.
        Err(StorageError::ObjectNotFound { .. }) => Err(AppError::internal(format!(
            "metadata copy failed: object `{key}` does not exist"
        ))),
        Err(other) => Err(other.into()),
    }
}

/// DELETE `/{filename}` — remove the object; absent keys succeed.
pub async fn remove_object(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    if !auth::authorized(&headers, &state.auth_token) {
        return Err(AppError::unauthorized());
    }
    let key = normalize_key(uri.path()).ok_or_else(|| AppError::not_found("empty object key"))?;

    state.storage.delete_object(&key).await?;
    info!(key = %key, "object deleted");
    Ok((StatusCode::OK, "OK"))
}

/// Fallback for every unsupported method, on any route.
pub async fn method_not_allowed() -> AppError {
    AppError::method_not_allowed()
}
