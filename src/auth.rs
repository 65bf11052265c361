//! Authorization gate.
//!
//! The credential check itself is a plain predicate over the request
//! headers; visibility metadata can relax it for reads only. Mutating
//! routes always require the predicate to pass.

use crate::mapping::{VISIBILITY_KEY, VISIBILITY_PUBLIC};
use axum::http::{HeaderMap, header};
use std::collections::BTreeMap;

/// Credential predicate: does the request carry the configured secret?
///
/// Compares the `Authorization` header against the configured token,
/// accepting an optional `Bearer ` prefix. An empty configured token
/// denies everything, so an unconfigured deployment is private by default.
pub fn authorized(headers: &HeaderMap, token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let presented = value.strip_prefix("Bearer ").unwrap_or(value);
    presented == token
}

/// Read gate: public objects are readable by anyone, everything else
/// requires the credential predicate.
///
/// Callers must translate a denial into a not-found response so private
/// object existence does not leak.
pub fn read_permitted(metadata: &BTreeMap<String, String>, headers: &HeaderMap, token: &str) -> bool {
    let public = metadata
        .get(VISIBILITY_KEY)
        .is_some_and(|v| v == VISIBILITY_PUBLIC);
    public || authorized(headers, token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_auth(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_should_accept_exact_and_bearer_tokens() {
        assert!(authorized(&headers_with_auth("s3cret"), "s3cret"));
        assert!(authorized(&headers_with_auth("Bearer s3cret"), "s3cret"));
    }

    #[test]
    fn test_should_reject_wrong_or_missing_credentials() {
        assert!(!authorized(&headers_with_auth("other"), "s3cret"));
        assert!(!authorized(&HeaderMap::new(), "s3cret"));
    }

    #[test]
    fn test_should_deny_everything_when_token_unset() {
        assert!(!authorized(&headers_with_auth("anything"), ""));
        assert!(!authorized(&headers_with_auth(""), ""));
    }

    #[test]
    fn test_should_permit_public_reads_without_credentials() {
        let mut metadata = BTreeMap::new();
        metadata.insert(VISIBILITY_KEY.to_string(), VISIBILITY_PUBLIC.to_string());
        assert!(read_permitted(&metadata, &HeaderMap::new(), "s3cret"));
    }

    #[test]
    fn test_should_require_credentials_for_private_reads() {
        let metadata = BTreeMap::new();
        assert!(!read_permitted(&metadata, &HeaderMap::new(), "s3cret"));
        assert!(read_permitted(&metadata, &headers_with_auth("s3cret"), "s3cret"));

        // A non-public visibility value does not relax the gate.
        let mut metadata = BTreeMap::new();
        metadata.insert(VISIBILITY_KEY.to_string(), "internal".to_string());
        assert!(!read_permitted(&metadata, &HeaderMap::new(), "s3cret"));
    }
}
