pub mod fs;
pub mod s3;

use crate::addressing::raw_uri;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::io;
use std::path::Path;

pub use fs::FsRawStore;
pub use s3::S3RawStore;

/// Durable, whole-object storage for raw payloads.
///
/// `put` either makes the complete object visible at `key` or fails; a reader
/// never observes a partial write. Writing the same key again replaces the
/// object.
#[async_trait]
pub trait RawStore: Send + Sync {
    /// Creates the bucket if it does not exist. Losing a creation race to a
    /// concurrent creator is success.
    async fn ensure_bucket(&self, bucket: &str) -> Result<()>;

    /// URI of the object at `bucket/key`. Keys are deterministic, so an event
    /// can reference its raw object before the upload happens.
    fn uri(&self, bucket: &str, key: &str) -> String {
        raw_uri(bucket, key)
    }

    /// Stores `bytes` at `bucket/key` and returns the object's URI.
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], content_type: &str) -> Result<String>;

    /// Stores the file at `path`. Implementations may stream from disk.
    async fn put_file(&self, bucket: &str, key: &str, path: &Path, content_type: &str) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| IngestError::storage(format!("read {}: {}", path.display(), e)))?;
        self.put(bucket, key, &bytes, content_type).await
    }
}

/// Runs blocking filesystem work on the runtime's blocking pool.
pub(crate) async fn blocking_io<T, F>(work: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
