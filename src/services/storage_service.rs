//! StorageService — the single-bucket storage capability behind the HTTP
//! façade. Object metadata lives in SQLite, payloads on local disk sharded
//! beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//!
//! Uploads are staged as fixed-size parts written by a bounded worker pool
//! and assembled into the final payload only once every part is durable; a
//! failed transfer removes everything it staged.

use crate::models::object::StoredObject;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use sqlx::SqlitePool;
use std::{
    collections::BTreeMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    task::JoinSet,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{key}` not found")]
    ObjectNotFound { key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Size of a single staged upload part.
const UPLOAD_PART_SIZE: usize = 5 * 1024 * 1024;

/// Number of part writers running at once for a single upload.
const UPLOAD_CONCURRENCY: usize = 4;

/// Result of staging an upload's parts.
struct StagedUpload {
    part_count: u32,
    size_bytes: i64,
    etag: String,
}

/// StorageService provides the bucket operations the façade composes:
/// - Get an object (metadata row plus an open payload reader)
/// - Put an object (staged multi-part write, then metadata upsert)
/// - Replace an object's metadata wholesale, content untouched
/// - Delete an object (idempotent)
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// The single bucket this service fronts.
    pub bucket: String,
}

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool,
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            bucket: bucket.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// The key normalizer upstream is deliberately permissive; this backend
    /// maps keys onto filesystem paths, so traversal-shaped keys are
    /// rejected here instead.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Physical root folder for the bucket.
    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(bucket/key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn object_shards(&self, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", self.bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Construct a fully-qualified object payload path.
    ///
    /// Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = self.object_shards(key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Fetch an object's metadata row.
    ///
    /// Returns ObjectNotFound if the record is missing.
    async fn fetch_object(&self, key: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, key, size_bytes, etag, content_type, last_modified, metadata
             FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                key: key.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Stream-upload an object as a staged multi-part transfer.
    ///
    /// - Splits the body into parts of `UPLOAD_PART_SIZE` bytes.
    /// - Writes parts through a pool of `UPLOAD_CONCURRENCY` workers.
    /// - Computes MD5/etag and size while chunking.
    /// - Assembles parts into a temp file, fsyncs, renames into place.
    /// - Upserts the metadata row (overwrite semantics).
    ///
    /// Any failure removes the staging directory before surfacing, so an
    /// aborted transfer leaves no partial data behind.
    pub async fn put_object_stream<S>(
        &self,
        key: &str,
        content_type: Option<String>,
        metadata: &BTreeMap<String, String>,
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let upload_id = Uuid::new_v4();
        let part_dir = parent.join(format!(".parts-{upload_id}"));
        fs::create_dir_all(&part_dir).await?;

        let staged = match stage_parts(&part_dir, stream).await {
            Ok(staged) => staged,
            Err(err) => {
                let _ = fs::remove_dir_all(&part_dir).await;
                return Err(err);
            }
        };

        let tmp_path = parent.join(format!(".tmp-{upload_id}"));
        if let Err(err) = assemble_parts(&part_dir, staged.part_count, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            let _ = fs::remove_dir_all(&part_dir).await;
            return Err(err);
        }
        let _ = fs::remove_dir_all(&part_dir).await;

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let metadata_json = serde_json::to_string(metadata)?;
        let insert_result = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (id, key, size_bytes, etag, content_type, last_modified, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                content_type = excluded.content_type,
                last_modified = excluded.last_modified,
                metadata = excluded.metadata
            RETURNING id, key, size_bytes, etag, content_type, last_modified, metadata
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key)
        .bind(staged.size_bytes)
        .bind(&staged.etag)
        .bind(content_type)
        .bind(Utc::now())
        .bind(&metadata_json)
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(obj) => {
                debug!(
                    key = %key,
                    size = staged.size_bytes,
                    parts = staged.part_count,
                    "stored object"
                );
                Ok(obj)
            }
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// Fetch an object for reading.
    ///
    /// Returns metadata and an opened File handle ready for streaming out.
    /// Returns ObjectNotFound if metadata exists but the payload is missing.
    pub async fn get_object_reader(&self, key: &str) -> StorageResult<(StoredObject, File)> {
        self.ensure_key_safe(key)?;
        let object = self.fetch_object(key).await?;

        let file_path = self.object_path(key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Replace an object's metadata wholesale, leaving content untouched.
    ///
    /// Same-key copy semantics: the previous map is discarded, not merged
    /// into. Fails with ObjectNotFound when the target does not exist — no
    /// implicit creation.
    pub async fn replace_metadata(
        &self,
        key: &str,
        metadata: &BTreeMap<String, String>,
    ) -> StorageResult<StoredObject> {
        self.ensure_key_safe(key)?;
        let metadata_json = serde_json::to_string(metadata)?;

        sqlx::query_as::<_, StoredObject>(
            "UPDATE objects SET metadata = ?, last_modified = ?
             WHERE key = ?
             RETURNING id, key, size_bytes, etag, content_type, last_modified, metadata",
        )
        .bind(&metadata_json)
        .bind(Utc::now())
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StorageError::ObjectNotFound {
            key: key.to_string(),
        })
    }

    /// Delete an object's row and payload.
    ///
    /// Idempotent by policy: deleting an absent key succeeds, both when the
    /// row is missing and when the payload file is already gone.
    pub async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.ensure_key_safe(key)?;

        sqlx::query("DELETE FROM objects WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root();
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(())
    }

    /// Recursively remove empty directories up to the bucket root.
    ///
    /// Stops when a directory is not empty, not found, or an unexpected
    /// I/O error occurs.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

fn part_name(number: u32) -> String {
    format!("part-{number:05}")
}

/// Write one staged part and make it durable.
async fn write_part(path: PathBuf, data: Bytes) -> io::Result<()> {
    let mut file = File::create(&path).await?;
    file.write_all(&data).await?;
    file.sync_all().await?;
    Ok(())
}

/// Wait for one part writer and surface its result.
async fn reap(tasks: &mut JoinSet<io::Result<()>>) -> StorageResult<()> {
    match tasks.join_next().await {
        Some(Ok(Ok(()))) => Ok(()),
        Some(Ok(Err(err))) => Err(StorageError::Io(err)),
        Some(Err(join_err)) => Err(StorageError::Io(io::Error::new(
            ErrorKind::Other,
            join_err,
        ))),
        None => Ok(()),
    }
}

/// Chunk the body into fixed-size parts and write them through a bounded
/// pool of workers, hashing the byte stream in arrival order.
///
/// On failure every outstanding part writer is aborted and awaited before
/// the error surfaces, so the caller can remove the staging directory
/// without racing a live writer. Dropping the returned future (request
/// abort) aborts outstanding writers as well.
async fn stage_parts<S>(part_dir: &Path, stream: S) -> StorageResult<StagedUpload>
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let mut tasks: JoinSet<io::Result<()>> = JoinSet::new();
    match drive_parts(part_dir, stream, &mut tasks).await {
        Ok(staged) => Ok(staged),
        Err(err) => {
            tasks.shutdown().await;
            Err(err)
        }
    }
}

/// Inner staging loop; a failure here leaves aborting to `stage_parts`.
async fn drive_parts<S>(
    part_dir: &Path,
    stream: S,
    tasks: &mut JoinSet<io::Result<()>>,
) -> StorageResult<StagedUpload>
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let mut buf = BytesMut::new();
    let mut digest = md5::Context::new();
    let mut size_bytes: i64 = 0;
    let mut part_count: u32 = 0;

    pin_mut!(stream);
    while let Some(chunk_res) = stream.next().await {
        let chunk = chunk_res.map_err(StorageError::Io)?;
        digest.consume(&chunk);
        size_bytes += chunk.len() as i64;
        buf.extend_from_slice(&chunk);

        while buf.len() >= UPLOAD_PART_SIZE {
            let data = buf.split_to(UPLOAD_PART_SIZE).freeze();
            part_count += 1;
            let path = part_dir.join(part_name(part_count));
            while tasks.len() >= UPLOAD_CONCURRENCY {
                reap(tasks).await?;
            }
            tasks.spawn(write_part(path, data));
        }
    }

    if !buf.is_empty() {
        part_count += 1;
        let path = part_dir.join(part_name(part_count));
        while tasks.len() >= UPLOAD_CONCURRENCY {
            reap(tasks).await?;
        }
        tasks.spawn(write_part(path, buf.freeze()));
    }

    while !tasks.is_empty() {
        reap(tasks).await?;
    }

    Ok(StagedUpload {
        part_count,
        size_bytes,
        etag: format!("{:x}", digest.compute()),
    })
}

/// Concatenate staged parts into the final temp file and make it durable.
async fn assemble_parts(part_dir: &Path, part_count: u32, tmp_path: &Path) -> StorageResult<()> {
    let mut out = File::create(tmp_path).await?;
    for number in 1..=part_count {
        let mut part = File::open(part_dir.join(part_name(number))).await?;
        tokio::io::copy(&mut part, &mut out).await?;
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn test_service() -> (StorageService, TempDir) {
        let temp = TempDir::new().expect("temp dir");
        let db_path = temp.path().join("meta.db");
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
            .await
            .expect("sqlite pool");

        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&db).await.expect("migration");
        }

        let service = StorageService::new(Arc::new(db), temp.path().join("objects"), "test-bucket");
        (service, temp)
    }

    fn body_stream(chunks: Vec<io::Result<Bytes>>) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        futures::stream::iter(chunks)
    }

    async fn read_all(mut file: File) -> Vec<u8> {
        let mut content = Vec::new();
        file.read_to_end(&mut content).await.expect("read payload");
        content
    }

    #[tokio::test]
    async fn test_should_roundtrip_content_and_metadata() {
        let (service, _temp) = test_service().await;
        let mut metadata = BTreeMap::new();
        metadata.insert("x-store-owner".to_string(), "alice".to_string());

        let stored = service
            .put_object_stream(
                "docs/note.txt",
                Some("text/plain".to_string()),
                &metadata,
                body_stream(vec![Ok(Bytes::from_static(b"hello parts"))]),
            )
            .await
            .expect("put");
        assert_eq!(stored.size_bytes, 11);
        assert_eq!(stored.etag, format!("{:x}", md5::compute(b"hello parts")));

        let (meta, file) = service.get_object_reader("docs/note.txt").await.expect("get");
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
        assert_eq!(meta.metadata_map().get("x-store-owner").map(String::as_str), Some("alice"));
        assert_eq!(read_all(file).await, b"hello parts");
    }

    #[tokio::test]
    async fn test_should_split_large_bodies_into_parts() {
        let (service, _temp) = test_service().await;

        // Two full parts plus a 3-byte tail, delivered in uneven chunks.
        let payload: Vec<u8> = (0..(2 * UPLOAD_PART_SIZE + 3)).map(|i| (i % 251) as u8).collect();
        let chunks: Vec<io::Result<Bytes>> = payload
            .chunks(1024 * 1024 + 17)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let stored = service
            .put_object_stream("big.bin", None, &BTreeMap::new(), body_stream(chunks))
            .await
            .expect("put");
        assert_eq!(stored.size_bytes as usize, payload.len());
        assert_eq!(stored.etag, format!("{:x}", md5::compute(&payload)));

        let (_, file) = service.get_object_reader("big.bin").await.expect("get");
        assert_eq!(read_all(file).await, payload);
    }

    #[tokio::test]
    async fn test_should_clean_up_parts_on_failed_transfer() {
        let (service, _temp) = test_service().await;

        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from(vec![7u8; UPLOAD_PART_SIZE])),
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away")),
        ];
        let err = service
            .put_object_stream("broken.bin", None, &BTreeMap::new(), body_stream(chunks))
            .await
            .expect_err("transfer must fail");
        assert!(matches!(err, StorageError::Io(_)));

        // No staged parts, temp files, or payload may survive the abort.
        let parent = service.object_path("broken.bin").parent().unwrap().to_path_buf();
        let mut entries = fs::read_dir(&parent).await.expect("parent dir exists");
        while let Some(entry) = entries.next_entry().await.expect("read entry") {
            panic!("orphaned entry left behind: {:?}", entry.file_name());
        }
        assert!(matches!(
            service.get_object_reader("broken.bin").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_store_empty_objects() {
        let (service, _temp) = test_service().await;
        let stored = service
            .put_object_stream("empty", None, &BTreeMap::new(), body_stream(vec![]))
            .await
            .expect("put");
        assert_eq!(stored.size_bytes, 0);

        let (_, file) = service.get_object_reader("empty").await.expect("get");
        assert!(read_all(file).await.is_empty());
    }

    #[tokio::test]
    async fn test_should_replace_metadata_wholesale() {
        let (service, _temp) = test_service().await;
        let mut original = BTreeMap::new();
        original.insert("x-store-a".to_string(), "1".to_string());
        original.insert("x-store-b".to_string(), "2".to_string());
        service
            .put_object_stream("item", None, &original, body_stream(vec![Ok(Bytes::from_static(b"x"))]))
            .await
            .expect("put");

        let mut replacement = BTreeMap::new();
        replacement.insert("x-store-c".to_string(), "3".to_string());
        let updated = service.replace_metadata("item", &replacement).await.expect("patch");

        let map = updated.metadata_map();
        assert_eq!(map.get("x-store-c").map(String::as_str), Some("3"));
        assert!(!map.contains_key("x-store-a"));
        assert!(!map.contains_key("x-store-b"));

        // Content untouched.
        let (meta, file) = service.get_object_reader("item").await.expect("get");
        assert_eq!(meta.size_bytes, 1);
        assert_eq!(read_all(file).await, b"x");
    }

    #[tokio::test]
    async fn test_should_fail_metadata_replacement_for_missing_object() {
        let (service, _temp) = test_service().await;
        let err = service
            .replace_metadata("ghost", &BTreeMap::new())
            .await
            .expect_err("no implicit creation");
        assert!(matches!(err, StorageError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn test_should_delete_idempotently() {
        let (service, _temp) = test_service().await;
        service
            .put_object_stream("gone", None, &BTreeMap::new(), body_stream(vec![Ok(Bytes::from_static(b"bye"))]))
            .await
            .expect("put");

        service.delete_object("gone").await.expect("first delete");
        assert!(matches!(
            service.get_object_reader("gone").await,
            Err(StorageError::ObjectNotFound { .. })
        ));

        // Absent key deletes are success, repeatedly.
        service.delete_object("gone").await.expect("second delete");
        service.delete_object("never-existed").await.expect("absent delete");
    }

    #[tokio::test]
    async fn test_should_reject_traversal_shaped_keys() {
        let (service, _temp) = test_service().await;
        let err = service
            .put_object_stream("../escape", None, &BTreeMap::new(), body_stream(vec![]))
            .await
            .expect_err("traversal key");
        assert!(matches!(err, StorageError::InvalidObjectKey));
        assert!(matches!(
            service.get_object_reader("a/../b").await,
            Err(StorageError::InvalidObjectKey)
        ));
    }
}
