//! Deterministic raw-object keys.
//!
//! File ingestion is content addressed (`source=<source>/dt=<date>/<sha256>/<name>`).
//! Stream and HTTP ingestion partition by the UTC day and a generated event id,
//! because their payloads carry no hash of their own.

use crate::error::{IngestError, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const HASH_CHUNK_BYTES: usize = 1024 * 1024;

/// The content kinds the file contract recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Csv,
    GeoJson,
    Json,
}

impl ContentKind {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(ContentKind::Csv),
            "geojson" => Ok(ContentKind::GeoJson),
            "json" => Ok(ContentKind::Json),
            _ => Err(IngestError::UnsupportedContentType(format!(".{}", ext))),
        }
    }

    /// Value carried in `payload.content_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Csv => "csv",
            ContentKind::GeoJson => "geojson",
            ContentKind::Json => "json",
        }
    }

    /// Content type stored on the raw object.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentKind::Csv => "text/csv",
            ContentKind::GeoJson => "application/geo+json",
            ContentKind::Json => "application/json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub sha256: String,
    pub size_bytes: u64,
}

/// Hashes a file in fixed-size chunks so memory stays bounded.
pub fn sha256_file(path: &Path) -> io::Result<FileDigest> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];
    let mut size_bytes = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size_bytes += n as u64;
    }
    Ok(FileDigest { sha256: hex::encode(hasher.finalize()), size_bytes })
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn sanitize_filename(name: &str) -> String {
    name.replace(['\\', '/'], "_").trim().to_string()
}

pub fn file_raw_key(source: &str, dt: NaiveDate, sha256: &str, original_name: &str) -> String {
    format!(
        "source={}/dt={}/{}/{}",
        source,
        dt.format("%Y-%m-%d"),
        sha256,
        sanitize_filename(original_name)
    )
}

/// A dataset becomes the first segment of a partitioned key, so it must be
/// a single, non-traversing path segment.
pub fn check_dataset(dataset: &str) -> std::result::Result<(), String> {
    if dataset.trim().is_empty() {
        return Err("dataset is blank".to_string());
    }
    if dataset.contains(['/', '\\']) {
        return Err(format!("dataset '{}' contains a path separator", dataset));
    }
    if dataset == "." || dataset == ".." {
        return Err(format!("dataset '{}' is not a usable key segment", dataset));
    }
    if dataset.chars().any(char::is_control) {
        return Err(format!("dataset '{}' contains control characters", dataset.escape_debug()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawKeys {
    pub payload: String,
    pub metadata: String,
}

pub fn partitioned_raw_keys(dataset: &str, source: &str, event_id: &str, now: DateTime<Utc>) -> RawKeys {
    let base = format!(
        "{}/{:04}/{:02}/{:02}/{}/{}",
        dataset,
        now.year(),
        now.month(),
        now.day(),
        source,
        event_id
    );
    RawKeys {
        payload: format!("{}/payload.json", base),
        metadata: format!("{}/metadata.json", base),
    }
}

pub fn raw_uri(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}
