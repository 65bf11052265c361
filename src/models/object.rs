//! Represents an object stored in the bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single stored object, addressed by its key.
///
/// The struct carries the metadata row; payload bytes live on disk and are
/// streamed separately.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 checksum of the content, exposed as the entity tag.
    pub etag: String,

    /// Content type declared at upload time, if any.
    pub content_type: Option<String>,

    /// Timestamp of the last write or metadata replacement.
    pub last_modified: DateTime<Utc>,

    /// Caller-supplied `x-store-*` metadata, JSON-encoded.
    pub metadata: String,
}

impl StoredObject {
    /// Decode the metadata column into a key/value map.
    ///
    /// A malformed column yields an empty map; the column is only ever
    /// written from a serialized `BTreeMap`.
    pub fn metadata_map(&self) -> BTreeMap<String, String> {
        serde_json::from_str(&self.metadata).unwrap_or_default()
    }
}
