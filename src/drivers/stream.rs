//! Relays source-topic messages into the raw store and `ingest.stream`
//! events. The source offset is committed only after both raw objects are
//! written and the event is acknowledged.

use super::put_raw;
use crate::addressing::{check_dataset, partitioned_raw_keys};
use crate::bus::{self, EventPublisher, SourceRecord, SourceStream};
use crate::config::{PoisonPillPolicy, StreamSettings};
use crate::constants::{JSON_CONTENT_TYPE, STREAM_SOURCE};
use crate::envelope::{build_stream_event, EventStamp, IngestEvent, StreamFacts, StreamMetadata};
use crate::error::{IngestError, Result};
use crate::schema::SchemaRegistry;
use crate::store::RawStore;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Polling,
    Parsing,
    Validated,
    RawStored,
    Published,
    OffsetCommitted,
    Malformed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Polling => "polling",
            StreamState::Parsing => "parsing",
            StreamState::Validated => "validated",
            StreamState::RawStored => "raw_stored",
            StreamState::Published => "published",
            StreamState::OffsetCommitted => "offset_committed",
            StreamState::Malformed => "malformed",
        };
        f.write_str(s)
    }
}

/// How one source record was disposed of.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDisposition {
    /// Raw objects written, event published, offset committed.
    Relayed { event: IngestEvent, metadata_uri: String },
    /// Malformed and skipped; the offset was committed.
    Skipped { reason: String },
    /// Malformed under the halt policy; nothing was committed.
    Halted { reason: String },
}

/// The fields the relay reads from a source message.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SourcePost {
    pub dataset: Option<String>,
    pub source_event_id: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
}

/// Parses a source message body. The error is a human readable reason.
pub(crate) fn parse_source(value: Option<&[u8]>) -> std::result::Result<SourcePost, String> {
    let bytes = value.ok_or_else(|| "message has no value".to_string())?;
    let text = std::str::from_utf8(bytes).map_err(|e| format!("value is not UTF-8: {}", e))?;
    let json: Value = serde_json::from_str(text).map_err(|e| format!("value is not JSON: {}", e))?;
    let object = json
        .as_object()
        .ok_or_else(|| "value is not a JSON object".to_string())?;

    let dataset = object
        .get("dataset")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(String::from);
    if let Some(dataset) = &dataset {
        check_dataset(dataset)?;
    }
    let source_event_id = object
        .get("source_event_id")
        .and_then(Value::as_str)
        .map(String::from);
    let event_time = match object.get("event_time") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(
            DateTime::parse_from_rfc3339(s)
                .map_err(|e| format!("event_time '{}' is not RFC 3339: {}", s, e))?
                .with_timezone(&Utc),
        ),
        Some(other) => return Err(format!("event_time must be a string, got {}", other)),
    };
    Ok(SourcePost { dataset, source_event_id, event_time })
}

pub struct StreamDriver<S> {
    settings: StreamSettings,
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn RawStore>,
    publisher: Arc<dyn EventPublisher>,
    source: S,
    state: StreamState,
    bucket_ready: bool,
}

impl<S: SourceStream> StreamDriver<S> {
    pub fn new(
        settings: StreamSettings,
        registry: Arc<SchemaRegistry>,
        store: Arc<dyn RawStore>,
        publisher: Arc<dyn EventPublisher>,
        source: S,
    ) -> Self {
        Self {
            settings,
            registry,
            store,
            publisher,
            source,
            state: StreamState::Polling,
            bucket_ready: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Polls once and handles the record, if any. A failed record is
    /// returned as `Err` without rewinding; `run` owns the retry policy.
    pub async fn step(&mut self) -> Result<Option<StreamDisposition>> {
        self.state = StreamState::Polling;
        match self.source.poll().await? {
            Some(record) => self.handle(&record).await.map(Some),
            None => Ok(None),
        }
    }

    /// Processes one source record to completion.
    pub async fn handle(&mut self, record: &SourceRecord) -> Result<StreamDisposition> {
        self.state = StreamState::Parsing;
        let post = match parse_source(record.value.as_deref()) {
            Ok(post) => post,
            Err(reason) => return self.malformed(record, reason).await,
        };

        let stamp = EventStamp::now();
        let dataset = post.dataset.unwrap_or_else(|| self.settings.default_dataset.clone());
        let keys = partitioned_raw_keys(&dataset, STREAM_SOURCE, &stamp.event_id, stamp.ingest_time);
        let bucket = self.settings.bucket.clone();
        let key = record.key_text();

        let event = build_stream_event(
            &stamp,
            StreamFacts {
                source: STREAM_SOURCE.to_string(),
                dataset: dataset.clone(),
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
                key: key.clone(),
                source_event_id: post.source_event_id.clone(),
                raw_uri: self.store.uri(&bucket, &keys.payload),
                metadata_uri: self.store.uri(&bucket, &keys.metadata),
                event_time: post.event_time,
                tags: self.settings.tags.clone(),
            },
        );
        self.registry.validate(&event)?;
        self.state = StreamState::Validated;

        let metadata = StreamMetadata {
            dataset,
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key,
            source_event_id: post.source_event_id,
            event_id: event.event_id.clone(),
            event_time: event.event_time,
            ingest_time: event.ingest_time,
        };
        let metadata_bytes = serde_json::to_vec(&metadata)?;

        if !self.bucket_ready {
            self.store.ensure_bucket(&bucket).await?;
            self.bucket_ready = true;
        }
        // Original bytes are stored unmodified; parse success implies a value.
        let payload = record.value.as_deref().unwrap_or_default();
        let raw_uri = put_raw(self.store.as_ref(), &bucket, &keys.payload, payload, JSON_CONTENT_TYPE).await?;
        let metadata_uri =
            put_raw(self.store.as_ref(), &bucket, &keys.metadata, &metadata_bytes, JSON_CONTENT_TYPE).await?;
        self.state = StreamState::RawStored;

        bus::publish_event(self.publisher.as_ref(), &self.settings.ingest_topic, &event).await?;
        self.state = StreamState::Published;

        self.source.commit(record).await?;
        self.state = StreamState::OffsetCommitted;
        crate::metrics::stream::committed();

        info!(
            dataset = %metadata.dataset,
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            raw_uri = %raw_uri,
            "ingest.stream done"
        );
        Ok(StreamDisposition::Relayed { event, metadata_uri })
    }

    async fn malformed(&mut self, record: &SourceRecord, reason: String) -> Result<StreamDisposition> {
        self.state = StreamState::Malformed;
        crate::metrics::stream::poison_pill();
        warn!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            reason = %reason,
            policy = ?self.settings.poison_pill,
            "Malformed source message"
        );
        match self.settings.poison_pill {
            PoisonPillPolicy::Skip => {
                self.source.commit(record).await?;
                self.state = StreamState::OffsetCommitted;
                crate::metrics::stream::committed();
                Ok(StreamDisposition::Skipped { reason })
            }
            PoisonPillPolicy::Halt => Ok(StreamDisposition::Halted { reason }),
        }
    }

    /// Relays until `shutdown` resolves or a fatal error occurs. Shutdown is
    /// observed only while waiting for the next record.
    ///
    /// A record that fails recoverably is rewound and retried after the
    /// backoff, so the group never commits past it.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            topic_ingest = %self.settings.ingest_topic,
            bucket = %self.settings.bucket,
            policy = ?self.settings.poison_pill,
            "Stream relay started"
        );
        tokio::pin!(shutdown);
        loop {
            self.state = StreamState::Polling;
            let polled = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stream relay stopping");
                    return Ok(());
                }
                polled = self.source.poll() => polled,
            };
            let record = match polled {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Poll failed");
                    tokio::time::sleep(self.settings.retry_backoff).await;
                    continue;
                }
            };

            match self.handle(&record).await {
                Ok(StreamDisposition::Halted { reason }) => {
                    error!(offset = record.offset, reason = %reason, "Halting on malformed message");
                    return Err(IngestError::Stream(format!(
                        "halted on malformed message at {}:{}@{}: {}",
                        record.topic, record.partition, record.offset, reason
                    )));
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(
                        failed_in = %self.state,
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Fatal error, stopping stream relay"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        failed_in = %self.state,
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Record failed, rewinding for redelivery"
                    );
                    self.source.rewind(&record).await?;
                    crate::metrics::stream::rewound();
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> std::result::Result<SourcePost, String> {
        parse_source(Some(bytes))
    }

    #[test]
    fn non_json_and_non_objects_are_malformed() {
        assert!(parse_source(None).is_err());
        assert!(parse(b"not json").is_err());
        assert!(parse(&[0xff, 0xfe]).is_err());
        assert!(parse(b"[1,2]").is_err());
    }

    #[test]
    fn event_time_must_be_rfc3339_when_present() {
        let ok = parse(br#"{"event_time":"2024-01-01T10:00:00Z","dataset":"posts"}"#).unwrap();
        assert_eq!(ok.event_time.unwrap().to_rfc3339(), "2024-01-01T10:00:00+00:00");
        assert_eq!(ok.dataset.as_deref(), Some("posts"));
        assert!(parse(br#"{"event_time":"yesterday"}"#).is_err());
        assert!(parse(br#"{"event_time":12}"#).is_err());
        assert_eq!(parse(br#"{"event_time":null}"#).unwrap().event_time, None);
    }

    #[test]
    fn blank_dataset_and_non_string_ids_are_ignored() {
        let post = parse(br#"{"dataset":"  ","source_event_id":7}"#).unwrap();
        assert_eq!(post.dataset, None);
        assert_eq!(post.source_event_id, None);
    }

    #[test]
    fn traversing_datasets_are_malformed() {
        assert!(parse(br#"{"dataset":".."}"#).is_err());
        assert!(parse(br#"{"dataset":"a/2024/01"}"#).is_err());
        assert!(parse(br#"{"dataset":"a\\b"}"#).is_err());
        assert_eq!(parse(br#"{"dataset":" posts "}"#).unwrap().dataset.as_deref(), Some("posts"));
    }
}
