#![allow(dead_code)]

use async_trait::async_trait;
use ingest_pipeline::bus::{DeliveryReceipt, EventPublisher, SourceRecord, SourceStream};
use ingest_pipeline::envelope::{EventType, IngestEvent};
use ingest_pipeline::error::{IngestError, Result};
use ingest_pipeline::http_client::{HttpClientPort, HttpGetResult};
use ingest_pipeline::schema::SchemaRegistry;
use ingest_pipeline::store::RawStore;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn registry() -> Arc<SchemaRegistry> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas");
    Arc::new(SchemaRegistry::load_dir(&dir).unwrap())
}

/// Registry for one origin whose payload must also carry `field`, so events
/// the drivers build without it fail validation.
pub fn registry_requiring(event_type: EventType, field: &str) -> Arc<SchemaRegistry> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas");
    let read = |name: &str| -> Value { serde_json::from_slice(&fs::read(dir.join(name)).unwrap()).unwrap() };
    let envelope = read("envelope.v1.schema.json");
    let mut origin = read(event_type.schema_file());
    origin["allOf"][1]["properties"]["payload"]["required"]
        .as_array_mut()
        .unwrap()
        .push(Value::from(field));
    Arc::new(SchemaRegistry::from_pair(event_type, envelope, origin).unwrap())
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Raw store kept in memory. Puts into a bucket nobody ensured fail.
#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<BTreeSet<String>>,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    fail_puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the next `n` puts.
    pub fn fail_next_puts(&self, n: usize) {
        self.fail_puts.store(n, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(&format!("{}/{}", bucket, key)).cloned()
    }

    pub fn contains_uri(&self, uri: &str) -> bool {
        uri.strip_prefix("s3://")
            .map(|path| self.objects.lock().unwrap().contains_key(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl RawStore for MemoryStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        self.buckets.lock().unwrap().insert(bucket.to_string());
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let pending = self.fail_puts.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_puts.store(pending - 1, Ordering::SeqCst);
            return Err(IngestError::storage("object store unreachable"));
        }
        if !self.buckets.lock().unwrap().contains(bucket) {
            return Err(IngestError::storage(format!("bucket '{}' does not exist", bucket)));
        }
        self.objects.lock().unwrap().insert(
            format!("{}/{}", bucket, key),
            StoredObject { bytes: bytes.to_vec(), content_type: content_type.to_string() },
        );
        Ok(self.uri(bucket, key))
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub key: String,
    pub event: IngestEvent,
    /// Whether the referenced raw object existed when the event was sent.
    pub raw_present: bool,
}

/// Publisher that records deliveries and can be told to fail.
pub struct RecordingPublisher {
    store: Arc<MemoryStore>,
    published: Mutex<Vec<Published>>,
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
}

impl RecordingPublisher {
    pub fn new(store: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            published: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<DeliveryReceipt> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(IngestError::publish(topic, "broker unavailable"));
        }
        let event: IngestEvent = serde_json::from_slice(payload).unwrap();
        let raw_present = self.store.contains_uri(event.payload.raw_uri());
        let mut published = self.published.lock().unwrap();
        published.push(Published { topic: topic.to_string(), key: key.to_string(), event, raw_present });
        Ok(DeliveryReceipt { topic: topic.to_string(), partition: 0, offset: published.len() as i64 - 1 })
    }
}

/// Scripted inbound stream. `rewind` puts the record back at the front.
#[derive(Default)]
pub struct FakeSource {
    pending: VecDeque<SourceRecord>,
    pub committed: Vec<i64>,
    pub rewound: Vec<i64>,
}

impl FakeSource {
    pub fn with(records: Vec<SourceRecord>) -> Self {
        Self { pending: records.into(), ..Self::default() }
    }
}

#[async_trait]
impl SourceStream for FakeSource {
    async fn poll(&mut self) -> Result<Option<SourceRecord>> {
        match self.pending.pop_front() {
            Some(record) => Ok(Some(record)),
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(None)
            }
        }
    }

    async fn commit(&mut self, record: &SourceRecord) -> Result<()> {
        self.committed.push(record.offset);
        Ok(())
    }

    async fn rewind(&mut self, record: &SourceRecord) -> Result<()> {
        self.rewound.push(record.offset);
        self.pending.push_front(record.clone());
        Ok(())
    }
}

pub fn source_record(topic: &str, partition: i32, offset: i64, value: &[u8]) -> SourceRecord {
    SourceRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: Some(format!("k-{}", offset).into_bytes()),
        value: Some(value.to_vec()),
    }
}

/// HTTP client that replays scripted responses; `None` simulates a failed fetch.
pub struct ScriptedHttp {
    responses: Mutex<VecDeque<Option<HttpGetResult>>>,
}

impl ScriptedHttp {
    pub fn new(responses: Vec<Option<HttpGetResult>>) -> Arc<Self> {
        Arc::new(Self { responses: Mutex::new(responses.into()) })
    }
}

pub fn json_response(status: u16, body: &[u8]) -> HttpGetResult {
    HttpGetResult {
        status,
        bytes: body.to_vec(),
        content_type: "application/json".to_string(),
        duration_ms: 12,
        rate_limit_remaining: Some(59),
    }
}

#[async_trait]
impl HttpClientPort for ScriptedHttp {
    async fn get(&self, url: &str) -> Result<HttpGetResult> {
        match self.responses.lock().unwrap().pop_front() {
            Some(Some(response)) => Ok(response),
            Some(None) => Err(IngestError::Input(format!("GET {} returned HTTP 503", url))),
            None => panic!("no scripted response left for {}", url),
        }
    }
}
