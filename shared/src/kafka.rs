use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Message, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, warn};

use crate::events;
use crate::log::{EventLog, LogError, LogRecord, ReadPosition, RecordId};

/// Every stream is a single-partition topic; one partition is what gives a
/// stream its total order.
const PARTITION: i32 = 0;

/// How long to wait for further records once a read has delivered one.
const DRAIN_WAIT: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    pub send_timeout: Duration,
    pub metadata_timeout: Duration,
}

impl KafkaConfig {
    pub fn new(brokers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: group_id.into(),
            send_timeout: Duration::from_secs(5),
            metadata_timeout: Duration::from_secs(2),
        }
    }
}

struct StreamReader {
    consumer: StreamConsumer,
    next_offset: Option<i64>,
}

/// Kafka-backed event log. Record ids are partition offsets.
pub struct KafkaEventLog {
    config: KafkaConfig,
    producer: FutureProducer,
    readers: Mutex<HashMap<String, StreamReader>>,
}

impl KafkaEventLog {
    pub fn connect(config: KafkaConfig) -> KafkaResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            config,
            producer,
            readers: Mutex::new(HashMap::new()),
        })
    }

    fn create_consumer(&self) -> KafkaResult<StreamConsumer> {
        ClientConfig::new()
            .set("group.id", &self.config.group_id)
            .set("bootstrap.servers", &self.config.brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
    }

    fn to_record(stream: &str, message: &BorrowedMessage<'_>) -> LogRecord {
        let fields = match message.payload_view::<str>() {
            Some(Ok(payload)) => events::decode_payload(payload).unwrap_or_else(|e| {
                warn!(stream, offset = message.offset(), error = %e, "Undecodable record payload");
                Vec::new()
            }),
            Some(Err(e)) => {
                warn!(stream, offset = message.offset(), error = %e, "Record payload is not UTF-8");
                Vec::new()
            }
            None => Vec::new(),
        };

        LogRecord {
            stream: stream.to_string(),
            id: RecordId::new(message.offset()),
            fields,
        }
    }
}

#[async_trait]
impl EventLog for KafkaEventLog {
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<RecordId, LogError> {
        let json = events::encode_payload(fields)?;
        let key = fields.first().map(|(_, value)| value.as_str()).unwrap_or_default();
        let record = FutureRecord::to(stream)
            .partition(PARTITION)
            .payload(&json)
            .key(key);

        let (_, offset) = self
            .producer
            .send(record, self.config.send_timeout)
            .await
            .map_err(|(e, _)| LogError::Kafka(e))?;

        Ok(RecordId::new(offset))
    }

    async fn read(
        &self,
        stream: &str,
        position: ReadPosition,
        block: Duration,
        count: usize,
    ) -> Result<Vec<LogRecord>, LogError> {
        let mut readers = self.readers.lock().await;
        if !readers.contains_key(stream) {
            let consumer = self.create_consumer()?;
            readers.insert(stream.to_string(), StreamReader { consumer, next_offset: None });
        }
        let Some(reader) = readers.get_mut(stream) else {
            return Ok(Vec::new());
        };

        let wanted = match position {
            ReadPosition::Beginning => 0,
            ReadPosition::After(id) => id.offset() + 1,
        };
        if reader.next_offset != Some(wanted) {
            let mut assignment = TopicPartitionList::new();
            assignment.add_partition_offset(stream, PARTITION, Offset::Offset(wanted))?;
            reader.consumer.assign(&assignment)?;
            reader.next_offset = Some(wanted);
            debug!(stream, offset = wanted, "Assigned stream reader");
        }

        let mut records = Vec::new();
        let mut wait = block;
        while records.len() < count.max(1) {
            match time::timeout(wait, reader.consumer.recv()).await {
                Err(_) => break,
                Ok(Err(e)) => {
                    reader.next_offset = None;
                    return Err(e.into());
                }
                Ok(Ok(message)) => {
                    records.push(Self::to_record(stream, &message));
                    reader.next_offset = Some(message.offset() + 1);
                    wait = DRAIN_WAIT;
                }
            }
        }

        Ok(records)
    }

    async fn last_id(&self, stream: &str) -> Result<Option<RecordId>, LogError> {
        let producer = self.producer.clone();
        let topic = stream.to_string();
        let timeout = self.config.metadata_timeout;

        let (low, high) = tokio::task::spawn_blocking(move || {
            producer.client().fetch_watermarks(&topic, PARTITION, timeout)
        })
        .await
        .map_err(|e| LogError::Unavailable(e.to_string()))??;

        Ok((high > low).then(|| RecordId::new(high - 1)))
    }

    async fn ping(&self) -> Result<(), LogError> {
        let producer = self.producer.clone();
        let timeout = self.config.metadata_timeout;

        tokio::task::spawn_blocking(move || producer.client().fetch_metadata(None, timeout))
            .await
            .map_err(|e| LogError::Unavailable(e.to_string()))??;

        Ok(())
    }
}
