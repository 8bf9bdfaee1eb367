use crate::constants::{FILE_SCHEMA_FILE, HTTP_SCHEMA_FILE, SCHEMA_VERSION_V1, STREAM_SCHEMA_FILE};
use crate::idempotency;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "ingest.file")]
    File,
    #[serde(rename = "ingest.http")]
    Http,
    #[serde(rename = "ingest.stream")]
    Stream,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::File, EventType::Http, EventType::Stream];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::File => "ingest.file",
            EventType::Http => "ingest.http",
            EventType::Stream => "ingest.stream",
        }
    }

    /// Schema version pinned for this event type.
    pub fn schema_version(&self) -> &'static str {
        SCHEMA_VERSION_V1
    }

    pub fn schema_file(&self) -> &'static str {
        match self {
            EventType::File => FILE_SCHEMA_FILE,
            EventType::Http => HTTP_SCHEMA_FILE,
            EventType::Stream => STREAM_SCHEMA_FILE,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        EventType::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FilePayload {
    pub dataset: String,
    pub raw_uri: String,
    pub content_type: String,
    pub checksum: String,
    pub source_file_name: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HttpPayload {
    pub dataset: String,
    pub endpoint: String,
    pub http_method: String,
    pub http_status: u16,
    pub raw_uri: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StreamPayload {
    pub dataset: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub raw_uri: String,
    pub metadata_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_event_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Payload {
    File(FilePayload),
    Http(HttpPayload),
    Stream(StreamPayload),
}

impl Payload {
    pub fn raw_uri(&self) -> &str {
        match self {
            Payload::File(p) => &p.raw_uri,
            Payload::Http(p) => &p.raw_uri,
            Payload::Stream(p) => &p.raw_uri,
        }
    }
}

/// The canonical ingest event published on the bus.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IngestEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub schema_version: String,
    pub source: String,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub payload: Payload,
}

impl IngestEvent {
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Identity and processing time of one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStamp {
    pub event_id: String,
    pub ingest_time: DateTime<Utc>,
}

impl EventStamp {
    /// Fresh id, current UTC time truncated to whole seconds.
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            ingest_time: now.trunc_subsecs(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileFacts {
    pub source: String,
    pub dataset: String,
    pub raw_uri: String,
    pub content_type: String,
    pub sha256: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub record_count: Option<u64>,
    pub tags: BTreeMap<String, String>,
}

pub fn build_file_event(stamp: &EventStamp, facts: FileFacts) -> IngestEvent {
    IngestEvent {
        event_id: stamp.event_id.clone(),
        event_type: EventType::File,
        schema_version: EventType::File.schema_version().to_string(),
        source: facts.source,
        event_time: stamp.ingest_time,
        ingest_time: stamp.ingest_time,
        idempotency_key: idempotency::file_key(&facts.sha256),
        tags: facts.tags,
        payload: Payload::File(FilePayload {
            dataset: facts.dataset,
            raw_uri: facts.raw_uri,
            content_type: facts.content_type,
            checksum: facts.sha256,
            source_file_name: facts.original_name,
            size_bytes: facts.size_bytes,
            record_count: facts.record_count,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct HttpFacts {
    pub source: String,
    pub dataset: String,
    pub endpoint: String,
    pub http_method: String,
    pub http_status: u16,
    pub raw_uri: String,
    pub duration_ms: u64,
    pub rate_limit_remaining: Option<u64>,
    pub cursor: Option<String>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub event_time: Option<DateTime<Utc>>,
    pub tags: BTreeMap<String, String>,
}

pub fn build_http_event(stamp: &EventStamp, facts: HttpFacts) -> IngestEvent {
    IngestEvent {
        event_id: stamp.event_id.clone(),
        event_type: EventType::Http,
        schema_version: EventType::Http.schema_version().to_string(),
        source: facts.source,
        event_time: facts.event_time.unwrap_or(stamp.ingest_time),
        ingest_time: stamp.ingest_time,
        idempotency_key: idempotency::http_key(&facts.dataset, &facts.endpoint, facts.cursor.as_deref()),
        tags: facts.tags,
        payload: Payload::Http(HttpPayload {
            dataset: facts.dataset,
            endpoint: facts.endpoint,
            http_method: facts.http_method,
            http_status: facts.http_status,
            raw_uri: facts.raw_uri,
            duration_ms: facts.duration_ms,
            rate_limit_remaining: facts.rate_limit_remaining,
            cursor: facts.cursor,
            window_start: facts.window_start,
            window_end: facts.window_end,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct StreamFacts {
    pub source: String,
    pub dataset: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub source_event_id: Option<String>,
    pub raw_uri: String,
    pub metadata_uri: String,
    pub event_time: Option<DateTime<Utc>>,
    pub tags: BTreeMap<String, String>,
}

pub fn build_stream_event(stamp: &EventStamp, facts: StreamFacts) -> IngestEvent {
    IngestEvent {
        event_id: stamp.event_id.clone(),
        event_type: EventType::Stream,
        schema_version: EventType::Stream.schema_version().to_string(),
        source: facts.source,
        event_time: facts.event_time.unwrap_or(stamp.ingest_time),
        ingest_time: stamp.ingest_time,
        idempotency_key: idempotency::stream_key(&facts.topic, facts.partition, facts.offset),
        tags: facts.tags,
        payload: Payload::Stream(StreamPayload {
            dataset: facts.dataset,
            topic: facts.topic,
            partition: facts.partition,
            offset: facts.offset,
            raw_uri: facts.raw_uri,
            metadata_uri: facts.metadata_uri,
            key: facts.key,
            source_event_id: facts.source_event_id,
        }),
    }
}

/// Sidecar `metadata.json` stored next to each stream payload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StreamMetadata {
    pub dataset: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub source_event_id: Option<String>,
    pub event_id: String,
    pub event_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
}
