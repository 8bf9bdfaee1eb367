//! Settings are parsed once in `main` (command line, then environment, then
//! defaults) and handed to each component by reference. Nothing below the CLI
//! reads the process environment.

use crate::constants::{FILE_SOURCE, FILE_TOPIC, HTTP_TOPIC, RAW_BUCKET, SOURCE_POSTS_TOPIC, STREAM_TOPIC};
use crate::error::{IngestError, Result};
use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendKind {
    S3,
    Fs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Once,
    Loop,
}

/// What the stream relay does with a message it cannot parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoisonPillPolicy {
    /// Log it and commit its offset so the partition keeps moving.
    Skip,
    /// Stop the relay without committing.
    Halt,
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    S3(S3Settings),
    Filesystem { root: PathBuf },
}

#[derive(Debug, Clone)]
pub struct RawStoreSettings {
    pub backend: StorageBackend,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct BusSettings {
    pub bootstrap_servers: String,
    pub client_id: String,
    pub publish_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub source_topic: String,
    pub group_id: String,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct FileSettings {
    pub source: String,
    pub dataset: Option<String>,
    pub bucket: String,
    pub topic: String,
    pub processed_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub dataset: String,
    pub url: String,
    pub bucket: String,
    pub topic: String,
    pub poll_interval: Duration,
    pub run_mode: RunMode,
    pub cursor: Option<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub ingest_topic: String,
    pub bucket: String,
    pub default_dataset: String,
    pub poison_pill: PoisonPillPolicy,
    pub retry_backoff: Duration,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub topic: String,
    pub dataset: String,
    pub posts_per_sec: f64,
    pub total: u64,
}

#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    /// Raw store backend
    #[arg(long, env = "STORAGE_BACKEND", value_enum, default_value_t = StorageBackendKind::S3)]
    pub storage_backend: StorageBackendKind,

    #[arg(long, env = "MINIO_ENDPOINT", default_value = "http://minio:9000")]
    pub minio_endpoint: String,

    #[arg(long, env = "MINIO_REGION", default_value = "us-east-1")]
    pub minio_region: String,

    #[arg(long, env = "MINIO_ACCESS_KEY", hide_env_values = true)]
    pub minio_access_key: Option<String>,

    #[arg(long, env = "MINIO_SECRET_KEY", hide_env_values = true)]
    pub minio_secret_key: Option<String>,

    /// Fallback for the access key (MinIO root user)
    #[arg(long, env = "MINIO_ROOT_USER", hide_env_values = true)]
    pub minio_root_user: Option<String>,

    /// Fallback for the secret key (MinIO root password)
    #[arg(long, env = "MINIO_ROOT_PASSWORD", hide_env_values = true)]
    pub minio_root_password: Option<String>,

    #[arg(long, env = "MINIO_BUCKET_RAW", default_value = RAW_BUCKET)]
    pub bucket: String,

    /// Root directory for the `fs` backend
    #[arg(long, env = "RAW_FS_ROOT", default_value = "data/raw-store")]
    pub raw_fs_root: PathBuf,
}

impl StorageArgs {
    pub fn settings(&self) -> Result<RawStoreSettings> {
        let backend = match self.storage_backend {
            StorageBackendKind::Fs => StorageBackend::Filesystem { root: self.raw_fs_root.clone() },
            StorageBackendKind::S3 => {
                let access_key = first_non_empty(&[&self.minio_access_key, &self.minio_root_user]);
                let secret_key = first_non_empty(&[&self.minio_secret_key, &self.minio_root_password]);
                match (access_key, secret_key) {
                    (Some(access_key), Some(secret_key)) => StorageBackend::S3(S3Settings {
                        endpoint: required("MINIO_ENDPOINT", &self.minio_endpoint)?,
                        region: self.minio_region.clone(),
                        access_key,
                        secret_key,
                    }),
                    _ => {
                        return Err(IngestError::Config(
                            "missing object store credentials: set MINIO_ACCESS_KEY/MINIO_SECRET_KEY \
                             or MINIO_ROOT_USER/MINIO_ROOT_PASSWORD"
                                .into(),
                        ))
                    }
                }
            }
        };
        Ok(RawStoreSettings { backend, bucket: required("MINIO_BUCKET_RAW", &self.bucket)? })
    }
}

#[derive(Args, Debug, Clone)]
pub struct BusArgs {
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS", default_value = "kafka:9092")]
    pub kafka_bootstrap_servers: String,

    /// Producer client id (defaults to the driver name)
    #[arg(long, env = "KAFKA_CLIENT_ID")]
    pub kafka_client_id: Option<String>,

    /// Upper bound on waiting for a broker acknowledgment
    #[arg(long, env = "KAFKA_PUBLISH_TIMEOUT_MS", default_value_t = 10_000)]
    pub kafka_publish_timeout_ms: u64,
}

impl BusArgs {
    pub fn settings(&self, default_client_id: &str) -> Result<BusSettings> {
        if self.kafka_publish_timeout_ms == 0 {
            return Err(IngestError::Config("KAFKA_PUBLISH_TIMEOUT_MS must be positive".into()));
        }
        Ok(BusSettings {
            bootstrap_servers: required("KAFKA_BOOTSTRAP_SERVERS", &self.kafka_bootstrap_servers)?,
            client_id: self
                .kafka_client_id
                .clone()
                .unwrap_or_else(|| default_client_id.to_string()),
            publish_timeout: Duration::from_millis(self.kafka_publish_timeout_ms),
        })
    }
}

/// Settings shared by every driver.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub bus: BusArgs,

    /// Directory holding the envelope and origin JSON schemas
    #[arg(long, env = "SCHEMA_DIR", default_value = "schemas")]
    pub schema_dir: PathBuf,

    /// `env` tag stamped on every event
    #[arg(long = "env-tag", env = "ENV", default_value = "local")]
    pub env_tag: String,

    /// `tenant` tag stamped on every event
    #[arg(long, env = "TENANT", default_value = "demo")]
    pub tenant: String,

    /// Directory for the rolling JSON log file
    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl CommonArgs {
    pub fn tags(&self) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        if !self.env_tag.trim().is_empty() {
            tags.insert("env".to_string(), self.env_tag.trim().to_string());
        }
        if !self.tenant.trim().is_empty() {
            tags.insert("tenant".to_string(), self.tenant.trim().to_string());
        }
        tags
    }
}

#[derive(Args, Debug, Clone)]
pub struct FileArgs {
    /// Path to the input file
    #[arg(long)]
    pub input: PathBuf,

    /// Business date for the raw partition (YYYY-MM-DD), defaults to today (UTC)
    #[arg(long)]
    pub dt: Option<NaiveDate>,

    /// Print the planned event without touching the store, the bus or the file
    #[arg(long)]
    pub dry_run: bool,

    /// Record count declared by the producer of the file
    #[arg(long)]
    pub record_count: Option<u64>,

    #[arg(long, env = "SOURCE", default_value = FILE_SOURCE)]
    pub source: String,

    /// Dataset name, defaults to the file stem
    #[arg(long, env = "DATASET")]
    pub dataset: Option<String>,

    #[arg(long, env = "KAFKA_TOPIC", default_value = FILE_TOPIC)]
    pub topic: String,

    #[arg(long, env = "PROCESSED_DIR", default_value = "/processed")]
    pub processed_dir: PathBuf,

    #[arg(long, env = "QUARANTINE_DIR", default_value = "/quarantine")]
    pub quarantine_dir: PathBuf,
}

impl FileArgs {
    pub fn settings(&self, common: &CommonArgs) -> Result<FileSettings> {
        Ok(FileSettings {
            source: required("SOURCE", &self.source)?,
            dataset: self.dataset.clone().filter(|d| !d.trim().is_empty()),
            bucket: required("MINIO_BUCKET_RAW", &common.storage.bucket)?,
            topic: required("KAFKA_TOPIC", &self.topic)?,
            processed_dir: self.processed_dir.clone(),
            quarantine_dir: self.quarantine_dir.clone(),
            tags: common.tags(),
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
    #[arg(long, env = "HTTP_URL")]
    pub http_url: String,

    #[arg(long, env = "HTTP_DATASET", default_value = "merchant_locations")]
    pub dataset: String,

    #[arg(long, env = "HTTP_TIMEOUT_SECONDS", default_value_t = 10)]
    pub timeout_seconds: u64,

    #[arg(long, env = "HTTP_POLL_SECONDS", default_value_t = 60)]
    pub poll_seconds: u64,

    /// Static pagination cursor; becomes part of the idempotency key
    #[arg(long, env = "HTTP_CURSOR")]
    pub cursor: Option<String>,

    #[arg(long, env = "RUN_MODE", value_enum, ignore_case = true, default_value_t = RunMode::Loop)]
    pub run_mode: RunMode,

    #[arg(long, env = "KAFKA_TOPIC_INGEST_HTTP", default_value = HTTP_TOPIC)]
    pub topic: String,
}

impl HttpArgs {
    pub fn settings(&self, common: &CommonArgs) -> Result<HttpSettings> {
        if self.poll_seconds == 0 {
            return Err(IngestError::Config("HTTP_POLL_SECONDS must be positive".into()));
        }
        Ok(HttpSettings {
            dataset: dataset_setting("HTTP_DATASET", &self.dataset)?,
            url: required("HTTP_URL", &self.http_url)?,
            bucket: required("MINIO_BUCKET_RAW", &common.storage.bucket)?,
            topic: required("KAFKA_TOPIC_INGEST_HTTP", &self.topic)?,
            poll_interval: Duration::from_secs(self.poll_seconds),
            run_mode: self.run_mode,
            cursor: self.cursor.clone().filter(|c| !c.trim().is_empty()),
            tags: common.tags(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
    #[arg(long, env = "KAFKA_TOPIC_SOURCE", default_value = SOURCE_POSTS_TOPIC)]
    pub source_topic: String,

    #[arg(long, env = "KAFKA_TOPIC_INGEST", default_value = STREAM_TOPIC)]
    pub ingest_topic: String,

    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "ingestor-stream.v1")]
    pub group_id: String,

    /// Dataset used when a source message does not name one
    #[arg(long, env = "DATASET", default_value = "posts")]
    pub dataset: String,

    /// Halt instead of skipping messages that are not valid JSON
    #[arg(long, env = "FAIL_ON_BAD_JSON")]
    pub fail_on_bad_json: bool,

    #[arg(long, env = "STREAM_POLL_MS", default_value_t = 1_000)]
    pub poll_ms: u64,

    /// Pause before a failed message is redelivered
    #[arg(long, env = "STREAM_RETRY_BACKOFF_MS", default_value_t = 1_000)]
    pub retry_backoff_ms: u64,
}

impl StreamArgs {
    pub fn settings(&self, common: &CommonArgs) -> Result<StreamSettings> {
        Ok(StreamSettings {
            ingest_topic: required("KAFKA_TOPIC_INGEST", &self.ingest_topic)?,
            bucket: required("MINIO_BUCKET_RAW", &common.storage.bucket)?,
            default_dataset: dataset_setting("DATASET", &self.dataset)?,
            poison_pill: if self.fail_on_bad_json { PoisonPillPolicy::Halt } else { PoisonPillPolicy::Skip },
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            tags: common.tags(),
        })
    }

    pub fn consumer_settings(&self) -> Result<ConsumerSettings> {
        Ok(ConsumerSettings {
            source_topic: required("KAFKA_TOPIC_SOURCE", &self.source_topic)?,
            group_id: required("KAFKA_GROUP_ID", &self.group_id)?,
            poll_interval: Duration::from_millis(self.poll_ms.max(1)),
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct ProduceArgs {
    #[command(flatten)]
    pub bus: BusArgs,

    #[arg(long, env = "KAFKA_TOPIC_SOURCE", default_value = SOURCE_POSTS_TOPIC)]
    pub topic: String,

    #[arg(long, env = "DATASET", default_value = "posts")]
    pub dataset: String,

    #[arg(long, env = "POSTS_PER_SEC", default_value_t = 5.0)]
    pub posts_per_sec: f64,

    /// Number of posts to send, 0 for no limit
    #[arg(long, env = "POSTS_TOTAL", default_value_t = 0)]
    pub total: u64,

    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,
}

impl ProduceArgs {
    pub fn settings(&self) -> Result<ProducerSettings> {
        if !(self.posts_per_sec > 0.0) {
            return Err(IngestError::Config("POSTS_PER_SEC must be positive".into()));
        }
        Ok(ProducerSettings {
            topic: required("KAFKA_TOPIC_SOURCE", &self.topic)?,
            dataset: required("DATASET", &self.dataset)?,
            posts_per_sec: self.posts_per_sec,
            total: self.total,
        })
    }
}

fn required(name: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        Err(IngestError::Config(format!("missing required setting: {}", name)))
    } else {
        Ok(value.to_string())
    }
}

fn dataset_setting(name: &str, value: &str) -> Result<String> {
    let value = required(name, value)?;
    crate::addressing::check_dataset(&value).map_err(|reason| IngestError::Config(format!("{}: {}", name, reason)))?;
    Ok(value)
}

fn first_non_empty(candidates: &[&Option<String>]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|c| c.as_deref())
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(String::from)
}
