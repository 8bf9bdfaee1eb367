//! Run-once ingestion of a single local file.

use crate::addressing::{self, ContentKind, FileDigest};
use crate::bus::{self, EventPublisher};
use super::put_raw_file;
use crate::config::FileSettings;
use crate::envelope::{build_file_event, EventStamp, FileFacts, IngestEvent};
use crate::error::{IngestError, Result};
use crate::schema::SchemaRegistry;
use crate::store::{blocking_io, RawStore};
use chrono::NaiveDate;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const REASON_FILE: &str = "reason.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Pending,
    Addressed,
    Validated,
    RawStored,
    Published,
    Processed,
    Quarantined,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Pending => "pending",
            FileState::Addressed => "addressed",
            FileState::Validated => "validated",
            FileState::RawStored => "raw_stored",
            FileState::Published => "published",
            FileState::Processed => "processed",
            FileState::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct FileRequest {
    pub path: PathBuf,
    /// Business date of the raw partition.
    pub dt: NaiveDate,
    pub record_count: Option<u64>,
}

/// Everything derived from the input before any side effect.
#[derive(Debug, Clone)]
pub struct FilePlan {
    pub bucket: String,
    pub key: String,
    pub content_kind: ContentKind,
    pub digest: FileDigest,
    pub event: IngestEvent,
}

#[derive(Debug)]
pub enum FileOutcome {
    Processed {
        event: IngestEvent,
        location: PathBuf,
    },
    Quarantined {
        /// Last state reached before the failure.
        failed_in: FileState,
        error: IngestError,
        location: PathBuf,
    },
}

impl FileOutcome {
    pub fn state(&self) -> FileState {
        match self {
            FileOutcome::Processed { .. } => FileState::Processed,
            FileOutcome::Quarantined { .. } => FileState::Quarantined,
        }
    }
}

/// Dataset from configuration, else the file stem.
pub fn resolve_dataset(settings: &FileSettings, path: &Path) -> Result<String> {
    let dataset = match &settings.dataset {
        Some(dataset) => dataset.trim().to_string(),
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string(),
    };
    if dataset.chars().count() < 2 {
        return Err(IngestError::Input(format!(
            "dataset '{}' must have at least 2 characters (set DATASET or use a longer file name)",
            dataset
        )));
    }
    addressing::check_dataset(&dataset).map_err(IngestError::Input)?;
    Ok(dataset)
}

/// What is known about an input before its bytes are read.
struct FileInput {
    original_name: String,
    content_kind: ContentKind,
    dataset: String,
}

fn inspect(settings: &FileSettings, path: &Path) -> Result<FileInput> {
    let original_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .ok_or_else(|| IngestError::Input(format!("input path has no file name: {}", path.display())))?;
    let content_kind = ContentKind::from_path(path)?;
    let dataset = resolve_dataset(settings, path)?;
    Ok(FileInput { original_name, content_kind, dataset })
}

fn assemble<F>(
    settings: &FileSettings,
    request: &FileRequest,
    stamp: &EventStamp,
    input: FileInput,
    digest: FileDigest,
    uri_of: F,
) -> FilePlan
where
    F: FnOnce(&str, &str) -> String,
{
    let key = addressing::file_raw_key(&settings.source, request.dt, &digest.sha256, &input.original_name);
    let raw_uri = uri_of(&settings.bucket, &key);

    let event = build_file_event(
        stamp,
        FileFacts {
            source: settings.source.clone(),
            dataset: input.dataset,
            raw_uri,
            content_type: input.content_kind.as_str().to_string(),
            sha256: digest.sha256.clone(),
            original_name: input.original_name,
            size_bytes: digest.size_bytes,
            record_count: request.record_count,
            tags: settings.tags.clone(),
        },
    );
    FilePlan { bucket: settings.bucket.clone(), key, content_kind: input.content_kind, digest, event }
}

/// Addresses the file and builds its event. `uri_of` maps bucket and key to
/// the URI the raw object will have. Hashes on the calling thread.
pub fn plan_file<F>(settings: &FileSettings, request: &FileRequest, stamp: &EventStamp, uri_of: F) -> Result<FilePlan>
where
    F: FnOnce(&str, &str) -> String,
{
    let input = inspect(settings, &request.path)?;
    let digest = addressing::sha256_file(&request.path)?;
    Ok(assemble(settings, request, stamp, input, digest, uri_of))
}

/// Plans and validates without touching the store, the bus or the input file.
pub fn preview(settings: &FileSettings, registry: &SchemaRegistry, request: &FileRequest) -> Result<FilePlan> {
    ensure_input(&request.path)?;
    let plan = plan_file(settings, request, &EventStamp::now(), addressing::raw_uri)?;
    registry.validate(&plan.event)?;
    Ok(plan)
}

pub struct FileDriver {
    settings: FileSettings,
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn RawStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl FileDriver {
    pub fn new(
        settings: FileSettings,
        registry: Arc<SchemaRegistry>,
        store: Arc<dyn RawStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { settings, registry, store, publisher }
    }

    /// Ingests one file. Any failure once the input exists moves it to
    /// quarantine and is reported as `FileOutcome::Quarantined`; `Err` means
    /// the input was missing or could not be moved aside.
    pub async fn ingest(&self, request: &FileRequest) -> Result<FileOutcome> {
        ensure_input(&request.path)?;

        let mut state = FileState::Pending;
        match self.process(request, &mut state).await {
            Ok((event, location)) => {
                crate::metrics::file::processed();
                info!(
                    idempotency_key = %event.idempotency_key,
                    raw_uri = %event.payload.raw_uri(),
                    location = %location.display(),
                    "File processed"
                );
                Ok(FileOutcome::Processed { event, location })
            }
            Err(error) => {
                crate::metrics::file::quarantined(state.as_str());
                let (src, dir, reason) = (
                    request.path.clone(),
                    self.settings.quarantine_dir.clone(),
                    error.to_string(),
                );
                let location = blocking_io(move || move_to_quarantine(&src, &dir, &reason))
                    .await
                    .map_err(|e| {
                        IngestError::Input(format!(
                            "quarantine {} after '{}' failed: {}",
                            request.path.display(),
                            error,
                            e
                        ))
                    })?;
                warn!(
                    input = %request.path.display(),
                    failed_in = %state,
                    location = %location.display(),
                    error = %error,
                    "File quarantined"
                );
                Ok(FileOutcome::Quarantined { failed_in: state, error, location })
            }
        }
    }

    async fn process(&self, request: &FileRequest, state: &mut FileState) -> Result<(IngestEvent, PathBuf)> {
        let input = inspect(&self.settings, &request.path)?;
        let path = request.path.clone();
        let digest = blocking_io(move || addressing::sha256_file(&path)).await?;
        let plan = assemble(&self.settings, request, &EventStamp::now(), input, digest, |bucket, key| {
            self.store.uri(bucket, key)
        });
        *state = FileState::Addressed;

        self.registry.validate(&plan.event)?;
        *state = FileState::Validated;

        self.store.ensure_bucket(&plan.bucket).await?;
        let uri = put_raw_file(
            self.store.as_ref(),
            &plan.bucket,
            &plan.key,
            &request.path,
            plan.digest.size_bytes,
            plan.content_kind.mime_type(),
        )
        .await?;
        info!(raw_uri = %uri, size_bytes = plan.digest.size_bytes, "Raw file stored");
        *state = FileState::RawStored;

        bus::publish_event(self.publisher.as_ref(), &self.settings.topic, &plan.event).await?;
        *state = FileState::Published;

        let (src, dir) = (request.path.clone(), self.settings.processed_dir.clone());
        let location = blocking_io(move || move_into(&src, &dir)).await?;
        Ok((plan.event, location))
    }
}

fn ensure_input(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(IngestError::Input(format!("input file does not exist: {}", path.display())))
    }
}

/// Moves `src` into `dir`, keeping its file name. Falls back to copy and
/// delete when a rename cannot cross filesystems.
pub fn move_into(src: &Path, dir: &Path) -> io::Result<PathBuf> {
    let name = src
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;
    fs::create_dir_all(dir)?;
    let dest = dir.join(name);
    if fs::rename(src, &dest).is_err() {
        fs::copy(src, &dest)?;
        fs::remove_file(src)?;
    }
    Ok(dest)
}

/// Moves `src` to `<quarantine>/<stem>/<name>` and records `reason` beside it.
pub fn move_to_quarantine(src: &Path, quarantine_dir: &Path, reason: &str) -> io::Result<PathBuf> {
    let stem = src
        .file_stem()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;
    let dir = quarantine_dir.join(stem);
    let dest = move_into(src, &dir)?;
    fs::write(dir.join(REASON_FILE), reason)?;
    Ok(dest)
}
