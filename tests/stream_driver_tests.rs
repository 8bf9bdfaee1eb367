mod common;

use common::{registry, source_record, FakeSource, MemoryStore, RecordingPublisher};
use ingest_pipeline::config::{PoisonPillPolicy, StreamSettings};
use ingest_pipeline::drivers::{StreamDisposition, StreamDriver, StreamState};
use ingest_pipeline::envelope::{Payload, StreamMetadata};
use ingest_pipeline::error::IngestError;
use ingest_pipeline::store::FsRawStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const TOPIC: &str = "source.posts.v1";
const POST: &[u8] = br#"{"dataset":"posts","source_event_id":"p-1","event_time":"2024-01-01T09:59:58Z","text":"hi"}"#;

fn settings(policy: PoisonPillPolicy) -> StreamSettings {
    StreamSettings {
        ingest_topic: "ingest.stream.v1".into(),
        bucket: "raw".into(),
        default_dataset: "fallback".into(),
        poison_pill: policy,
        retry_backoff: Duration::from_millis(1),
        tags: BTreeMap::new(),
    }
}

fn driver(
    policy: PoisonPillPolicy,
    source: FakeSource,
    store: &Arc<MemoryStore>,
    publisher: &Arc<RecordingPublisher>,
) -> StreamDriver<FakeSource> {
    StreamDriver::new(settings(policy), registry(), store.clone(), publisher.clone(), source)
}

#[tokio::test]
async fn relays_message_and_commits_after_publish() {
    let store = MemoryStore::new();
    let publisher = RecordingPublisher::new(store.clone());
    let record = source_record(TOPIC, 0, 42, POST);
    let mut driver = driver(PoisonPillPolicy::Skip, FakeSource::default(), &store, &publisher);

    let disposition = driver.handle(&record).await.unwrap();

    assert_eq!(driver.state(), StreamState::OffsetCommitted);
    assert_eq!(driver.source().committed, vec![42]);
    let (event, metadata_uri) = match disposition {
        StreamDisposition::Relayed { event, metadata_uri } => (event, metadata_uri),
        other => panic!("expected relayed, got {:?}", other),
    };
    assert_eq!(event.idempotency_key, "ingest-stream:source.posts.v1:0:42");
    assert_eq!(event.event_time.to_rfc3339(), "2024-01-01T09:59:58+00:00");

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, event.idempotency_key);
    assert!(published[0].raw_present);

    assert_eq!(store.len(), 2);
    let payload = match &event.payload {
        Payload::Stream(payload) => payload.clone(),
        other => panic!("unexpected payload {:?}", other),
    };
    assert_eq!(payload.dataset, "posts");
    assert_eq!(payload.partition, 0);
    assert_eq!(payload.offset, 42);
    assert_eq!(payload.key.as_deref(), Some("k-42"));
    assert_eq!(payload.source_event_id.as_deref(), Some("p-1"));
    assert_eq!(payload.metadata_uri, metadata_uri);

    let raw = store.get("raw", payload.raw_uri.trim_start_matches("s3://raw/")).unwrap();
    assert_eq!(raw.bytes, POST, "raw payload is the original message bytes");
    let sidecar = store.get("raw", metadata_uri.trim_start_matches("s3://raw/")).unwrap();
    let metadata: StreamMetadata = serde_json::from_slice(&sidecar.bytes).unwrap();
    assert_eq!(metadata.offset, 42);
    assert_eq!(metadata.event_id, event.event_id);
}

#[tokio::test]
async fn publish_failure_leaves_offset_uncommitted() {
    let store = MemoryStore::new();
    let publisher = RecordingPublisher::new(store.clone());
    publisher.fail_next(1);
    let record = source_record(TOPIC, 0, 42, POST);
    let mut driver = driver(PoisonPillPolicy::Skip, FakeSource::default(), &store, &publisher);

    let err = driver.handle(&record).await.unwrap_err();

    assert!(matches!(err, IngestError::Publish { .. }));
    assert!(!err.is_fatal());
    assert_eq!(driver.state(), StreamState::RawStored);
    assert!(driver.source().committed.is_empty());
}

#[tokio::test]
async fn storage_failure_leaves_offset_uncommitted() {
    let store = MemoryStore::new();
    store.fail_next_puts(1);
    let publisher = RecordingPublisher::new(store.clone());
    let record = source_record(TOPIC, 0, 7, POST);
    let mut driver = driver(PoisonPillPolicy::Skip, FakeSource::default(), &store, &publisher);

    assert!(driver.handle(&record).await.is_err());
    assert_eq!(publisher.attempts(), 0);
    assert!(driver.source().committed.is_empty());
}

#[tokio::test]
async fn non_json_is_skipped_and_committed_by_default() {
    let store = MemoryStore::new();
    let publisher = RecordingPublisher::new(store.clone());
    let record = source_record(TOPIC, 1, 5, b"not json at all");
    let mut driver = driver(PoisonPillPolicy::Skip, FakeSource::default(), &store, &publisher);

    let disposition = driver.handle(&record).await.unwrap();

    assert!(matches!(disposition, StreamDisposition::Skipped { .. }));
    assert_eq!(driver.source().committed, vec![5]);
    assert_eq!(store.len(), 0);
    assert_eq!(publisher.attempts(), 0);
}

#[tokio::test]
async fn malformed_event_time_is_a_poison_pill() {
    let store = MemoryStore::new();
    let publisher = RecordingPublisher::new(store.clone());
    let record = source_record(TOPIC, 0, 3, br#"{"event_time":"last tuesday"}"#);
    let mut driver = driver(PoisonPillPolicy::Skip, FakeSource::default(), &store, &publisher);

    let disposition = driver.handle(&record).await.unwrap();

    assert!(matches!(disposition, StreamDisposition::Skipped { .. }));
    assert_eq!(driver.source().committed, vec![3]);
}

#[tokio::test]
async fn halt_policy_stops_without_committing() {
    let store = MemoryStore::new();
    let publisher = RecordingPublisher::new(store.clone());
    let source = FakeSource::with(vec![source_record(TOPIC, 0, 9, b"\xff\xfe")]);
    let mut driver = driver(PoisonPillPolicy::Halt, source, &store, &publisher);

    let err = driver.run(std::future::pending()).await.unwrap_err();

    assert!(matches!(err, IngestError::Stream(_)));
    assert!(driver.source().committed.is_empty());
}

#[tokio::test]
async fn missing_dataset_falls_back_to_default() {
    let store = MemoryStore::new();
    let publisher = RecordingPublisher::new(store.clone());
    let record = source_record(TOPIC, 0, 1, br#"{"text":"no dataset here"}"#);
    let mut driver = driver(PoisonPillPolicy::Skip, FakeSource::default(), &store, &publisher);

    match driver.handle(&record).await.unwrap() {
        StreamDisposition::Relayed { event, .. } => {
            match &event.payload {
                Payload::Stream(payload) => assert_eq!(payload.dataset, "fallback"),
                other => panic!("unexpected payload {:?}", other),
            }
            assert_eq!(event.event_time, event.ingest_time);
        }
        other => panic!("expected relayed, got {:?}", other),
    }
}

#[tokio::test]
async fn failed_record_is_rewound_and_redelivered() {
    let store = MemoryStore::new();
    let publisher = RecordingPublisher::new(store.clone());
    publisher.fail_next(1);
    let source = FakeSource::with(vec![source_record(TOPIC, 0, 42, POST)]);
    let mut driver = driver(PoisonPillPolicy::Skip, source, &store, &publisher);

    driver.run(tokio::time::sleep(Duration::from_millis(200))).await.unwrap();

    assert_eq!(driver.source().rewound, vec![42]);
    assert_eq!(driver.source().committed, vec![42]);
    assert_eq!(publisher.attempts(), 2);
    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, "ingest-stream:source.posts.v1:0:42");
}

#[tokio::test]
async fn traversing_dataset_is_skipped_and_the_next_message_relayed() {
    let store = MemoryStore::new();
    let publisher = RecordingPublisher::new(store.clone());
    let source = FakeSource::with(vec![
        source_record(TOPIC, 0, 1, br#"{"dataset":"..","text":"escape"}"#),
        source_record(TOPIC, 0, 2, br#"{"dataset":"a/2024/01","text":"nested"}"#),
        source_record(TOPIC, 0, 3, POST),
    ]);
    let mut driver = driver(PoisonPillPolicy::Skip, source, &store, &publisher);

    driver.run(tokio::time::sleep(Duration::from_millis(200))).await.unwrap();

    assert_eq!(driver.source().committed, vec![1, 2, 3]);
    assert!(driver.source().rewound.is_empty(), "a bad dataset is not retried");
    assert_eq!(publisher.attempts(), 1);
    assert!(store.keys().iter().all(|k| k.starts_with("raw/posts/")), "{:?}", store.keys());
}

#[tokio::test]
async fn traversing_dataset_halts_under_the_halt_policy() {
    let store = MemoryStore::new();
    let publisher = RecordingPublisher::new(store.clone());
    let source = FakeSource::with(vec![source_record(TOPIC, 0, 4, br#"{"dataset":".."}"#)]);
    let mut driver = driver(PoisonPillPolicy::Halt, source, &store, &publisher);

    let err = driver.run(std::future::pending()).await.unwrap_err();

    assert!(matches!(err, IngestError::Stream(_)));
    assert!(driver.source().committed.is_empty());
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn relayed_objects_stay_inside_the_filesystem_bucket() {
    let dir = tempfile::tempdir().unwrap();
    let fs_store = Arc::new(FsRawStore::new(dir.path()));
    let memory = MemoryStore::new();
    let publisher = RecordingPublisher::new(memory.clone());
    let mut driver = StreamDriver::new(
        settings(PoisonPillPolicy::Skip),
        registry(),
        fs_store,
        publisher.clone(),
        FakeSource::default(),
    );

    let escaped = driver.handle(&source_record(TOPIC, 0, 1, br#"{"dataset":".."}"#)).await.unwrap();
    assert!(matches!(escaped, StreamDisposition::Skipped { .. }));
    let relayed = driver.handle(&source_record(TOPIC, 0, 2, POST)).await.unwrap();
    assert!(matches!(relayed, StreamDisposition::Relayed { .. }));

    let top: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(top, vec!["raw".to_string()]);
    let datasets: Vec<_> = std::fs::read_dir(dir.path().join("raw"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(datasets, vec!["posts".to_string()]);
}
