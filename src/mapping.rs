//! Request-to-object mapping: key normalization, content-type resolution,
//! and collection of caller-supplied metadata headers.
//!
//! Everything here is a pure function over strings and header maps so the
//! handlers stay thin and the contracts stay testable without a server.

use axum::http::HeaderMap;
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;

/// Prefix identifying caller-supplied object metadata headers.
pub const METADATA_PREFIX: &str = "x-store-";

/// Metadata key controlling unauthenticated read access.
pub const VISIBILITY_KEY: &str = "x-store-visibility";

/// Visibility value that permits reads without credentials.
pub const VISIBILITY_PUBLIC: &str = "public";

/// Metadata key forcing text rendering of the payload.
pub const RENDER_KEY: &str = "x-store-type";

/// Render value that forces `text/plain; charset=utf-8`.
pub const RENDER_TEXT: &str = "text";

/// Sentinel content type meaning "unknown, derive from the key".
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type used when `x-store-type: text` is set.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Turn a raw URL path into a canonical object key.
///
/// Percent-decodes the whole path in a single pass, strips the leading run
/// of slashes, and strips exactly one trailing slash. Returns `None` when
/// nothing remains; there is no meaningful root object.
///
/// `.` and `..` segments pass through untouched — the storage layer is the
/// one mapping keys to paths and rejects traversal there.
pub fn normalize_key(raw: &str) -> Option<String> {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let stripped = decoded.trim_start_matches('/');
    let stripped = stripped.strip_suffix('/').unwrap_or(stripped);
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Resolve the outgoing `Content-Type` for an object.
///
/// The caller-declared type wins unless it is the fallback sentinel, in
/// which case the key's extension decides via a standard MIME table. An
/// `x-store-type: text` override beats both. Never returns an empty string.
pub fn resolve_content_type(declared: Option<&str>, key: &str, force_text: bool) -> String {
    if force_text {
        return TEXT_CONTENT_TYPE.to_string();
    }
    match declared {
        Some(ct) if !ct.is_empty() && ct != FALLBACK_CONTENT_TYPE => ct.to_string(),
        _ => mime_guess::from_path(key)
            .first_or_octet_stream()
            .to_string(),
    }
}

/// Project inbound request headers onto an object metadata map.
///
/// Keeps every header whose name starts with `x-store-` (header names are
/// already lowercase in the `http` crate, so the match is case-insensitive
/// by construction) and drops everything else. Values that are not valid
/// UTF-8 are skipped.
pub fn collect_object_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str();
            if !name.starts_with(METADATA_PREFIX) {
                return None;
            }
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}
