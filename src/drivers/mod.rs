//! The three ingest drivers. Each runs as one sequential loop and finishes a
//! unit of work (raw write, publish, acknowledgment) before taking the next.

pub mod file;
pub mod http;
pub mod stream;

use crate::error::Result;
use crate::store::RawStore;
use std::path::Path;
use tracing::debug;

pub use file::{FileDriver, FileOutcome, FileRequest, FileState};
pub use http::{HttpPollDriver, HttpState};
pub use stream::{StreamDisposition, StreamDriver, StreamState};

pub(crate) async fn put_raw(
    store: &dyn RawStore,
    bucket: &str,
    key: &str,
    bytes: &[u8],
    content_type: &str,
) -> Result<String> {
    match store.put(bucket, key, bytes, content_type).await {
        Ok(uri) => {
            crate::metrics::raw_store::write_success(bytes.len() as u64);
            debug!(raw_uri = %uri, bytes = bytes.len(), "Raw object stored");
            Ok(uri)
        }
        Err(e) => {
            crate::metrics::raw_store::write_error();
            Err(e)
        }
    }
}

pub(crate) async fn put_raw_file(
    store: &dyn RawStore,
    bucket: &str,
    key: &str,
    path: &Path,
    size_bytes: u64,
    content_type: &str,
) -> Result<String> {
    match store.put_file(bucket, key, path, content_type).await {
        Ok(uri) => {
            crate::metrics::raw_store::write_success(size_bytes);
            debug!(raw_uri = %uri, bytes = size_bytes, "Raw object stored from file");
            Ok(uri)
        }
        Err(e) => {
            crate::metrics::raw_store::write_error();
            Err(e)
        }
    }
}
