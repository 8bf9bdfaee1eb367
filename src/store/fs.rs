use super::{blocking_io, RawStore};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Directory-backed raw store: objects live at `<root>/<bucket>/<key>`.
pub struct FsRawStore {
    root: PathBuf,
}

impl FsRawStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.root.join(bucket);
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    fn uri_for(path: &Path) -> String {
        format!("file://{}", path.display())
    }

    fn check_key(key: &str) -> Result<()> {
        if key.is_empty() || key.split('/').any(|s| s == "..") {
            return Err(IngestError::storage(format!("invalid object key '{}'", key)));
        }
        Ok(())
    }

    async fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        let dir = self.root.join(bucket);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            _ => Err(IngestError::storage(format!("bucket '{}' does not exist", bucket))),
        }
    }

    // Write into a temp file beside the destination, then rename over it.
    fn write_atomic(path: &Path, write: impl FnOnce(&mut NamedTempFile) -> io::Result<()>) -> io::Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "object path has no parent"))?;
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        write(&mut tmp)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl RawStore for FsRawStore {
    fn uri(&self, bucket: &str, key: &str) -> String {
        Self::uri_for(&self.object_path(bucket, key))
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let dir = self.root.join(bucket);
        match tokio::fs::create_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
            Err(e) => Err(IngestError::storage(format!("create bucket {}: {}", dir.display(), e))),
        }
    }

    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], _content_type: &str) -> Result<String> {
        Self::check_key(key)?;
        self.bucket_dir(bucket).await?;
        let path = self.object_path(bucket, key);
        let target = path.clone();
        let body = bytes.to_vec();
        blocking_io(move || Self::write_atomic(&target, |tmp| tmp.write_all(&body)))
            .await
            .map_err(|e| IngestError::storage(format!("write {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Raw object written");
        Ok(Self::uri_for(&path))
    }

    async fn put_file(&self, bucket: &str, key: &str, source: &Path, _content_type: &str) -> Result<String> {
        Self::check_key(key)?;
        self.bucket_dir(bucket).await?;
        let path = self.object_path(bucket, key);
        let target = path.clone();
        let from = source.to_path_buf();
        blocking_io(move || {
            Self::write_atomic(&target, |tmp| {
                let mut input = fs::File::open(&from)?;
                io::copy(&mut input, tmp).map(|_| ())
            })
        })
        .await
        .map_err(|e| IngestError::storage(format!("write {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), source = %source.display(), "Raw object written from file");
        Ok(Self::uri_for(&path))
    }
}
