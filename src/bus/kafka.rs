use super::{DeliveryReceipt, EventPublisher, SourceRecord, SourceStream};
use crate::config::{BusSettings, ConsumerSettings};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(100);
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaPublisher {
    producer: FutureProducer,
    publish_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(settings: &BusSettings) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.bootstrap_servers)
            .set("client.id", &settings.client_id)
            .set("socket.timeout.ms", "5000")
            .set("message.timeout.ms", settings.publish_timeout.as_millis().to_string())
            .create()
            .map_err(|e| IngestError::Config(format!("kafka producer: {}", e)))?;
        Ok(Self { producer, publish_timeout: settings.publish_timeout })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<DeliveryReceipt> {
        let deadline = Instant::now() + self.publish_timeout;
        let mut record = FutureRecord::to(topic).key(key).payload(payload);

        // A full local queue is retried until the deadline while the
        // producer's background poller drains earlier deliveries.
        let delivery = loop {
            match self.producer.send_result(record) {
                Ok(delivery) => break delivery,
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    if Instant::now() >= deadline {
                        return Err(IngestError::publish(topic, "local send queue stayed full until timeout"));
                    }
                    debug!(topic, "Producer queue full, retrying");
                    record = returned;
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                }
                Err((e, _)) => return Err(IngestError::publish(topic, e.to_string())),
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, delivery).await {
            Ok(Ok(Ok((partition, offset)))) => Ok(DeliveryReceipt { topic: topic.to_string(), partition, offset }),
            Ok(Ok(Err((e, _message)))) => Err(IngestError::publish(topic, e.to_string())),
            Ok(Err(_canceled)) => Err(IngestError::publish(topic, "delivery future canceled")),
            Err(_elapsed) => Err(IngestError::publish(
                topic,
                format!("no broker acknowledgment within {:?}", self.publish_timeout),
            )),
        }
    }
}

pub struct KafkaSource {
    consumer: StreamConsumer,
    poll_interval: Duration,
}

impl KafkaSource {
    pub fn new(bus: &BusSettings, settings: &ConsumerSettings) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &bus.bootstrap_servers)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| IngestError::Config(format!("kafka consumer: {}", e)))?;
        consumer
            .subscribe(&[settings.source_topic.as_str()])
            .map_err(|e| IngestError::Config(format!("subscribe {}: {}", settings.source_topic, e)))?;
        Ok(Self { consumer, poll_interval: settings.poll_interval })
    }
}

#[async_trait]
impl SourceStream for KafkaSource {
    async fn poll(&mut self) -> Result<Option<SourceRecord>> {
        match tokio::time::timeout(self.poll_interval, self.consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Err(e)) => Err(IngestError::Stream(e.to_string())),
            Ok(Ok(message)) => Ok(Some(SourceRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                value: message.payload().map(<[u8]>::to_vec),
            })),
        }
    }

    async fn commit(&mut self, record: &SourceRecord) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| IngestError::Stream(format!("commit position: {}", e)))?;
        let consumer = &self.consumer;
        tokio::task::block_in_place(|| consumer.commit(&tpl, CommitMode::Sync))
            .map_err(|e| IngestError::Stream(format!("commit {}:{}@{}: {}", record.topic, record.partition, record.offset, e)))
    }

    async fn rewind(&mut self, record: &SourceRecord) -> Result<()> {
        let consumer = &self.consumer;
        tokio::task::block_in_place(|| {
            consumer.seek(&record.topic, record.partition, Offset::Offset(record.offset), SEEK_TIMEOUT)
        })
        .map_err(|e| {
            warn!(topic = %record.topic, partition = record.partition, offset = record.offset, error = %e, "Seek failed");
            IngestError::Stream(format!("seek {}:{}@{}: {}", record.topic, record.partition, record.offset, e))
        })
    }
}
