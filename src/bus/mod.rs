pub mod kafka;

use crate::envelope::IngestEvent;
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

pub use kafka::{KafkaPublisher, KafkaSource};

/// Broker acknowledgment for one published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Delivers messages to a partitioned, ordered topic.
///
/// `publish` returns only once the broker has acknowledged the message or the
/// publisher's bounded timeout has elapsed; a delivery failure is an error,
/// never a silent drop.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<DeliveryReceipt>;
}

/// Publishes an envelope as UTF-8 JSON keyed by its idempotency key.
pub async fn publish_event<P>(publisher: &P, topic: &str, event: &IngestEvent) -> Result<DeliveryReceipt>
where
    P: EventPublisher + ?Sized,
{
    let body = event.to_json_bytes()?;
    let result = publisher.publish(topic, &event.idempotency_key, &body).await;
    match &result {
        Ok(receipt) => {
            crate::metrics::bus::publish_success(event.event_type.as_str());
            info!(
                topic = %receipt.topic,
                partition = receipt.partition,
                offset = receipt.offset,
                idempotency_key = %event.idempotency_key,
                "Event delivered"
            );
        }
        Err(_) => crate::metrics::bus::publish_error(event.event_type.as_str()),
    }
    result
}

/// One message consumed from the inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
}

impl SourceRecord {
    /// Message key as text; keys that are not UTF-8 are rendered lossily.
    pub fn key_text(&self) -> Option<String> {
        self.key
            .as_ref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }
}

/// Inbound stream with manual offset management.
#[async_trait]
pub trait SourceStream: Send {
    /// Waits up to the source's poll interval; `None` when nothing arrived.
    async fn poll(&mut self) -> Result<Option<SourceRecord>>;

    /// Synchronously commits `record` as processed.
    async fn commit(&mut self, record: &SourceRecord) -> Result<()>;

    /// Repositions the stream so `record` is delivered again.
    async fn rewind(&mut self, record: &SourceRecord) -> Result<()>;
}
