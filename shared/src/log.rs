use async_trait::async_trait;
use rdkafka::error::KafkaError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::events::{self, DecodeError, Fields};

/// Log-assigned position of a record within its stream.
///
/// Ids are opaque to producers and consumers; they only promise to grow
/// monotonically within one stream, which makes them usable as cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(i64);

impl RecordId {
    pub fn new(offset: i64) -> Self {
        Self(offset)
    }

    pub fn offset(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(RecordId)
    }
}

/// Where a read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPosition {
    Beginning,
    /// Strictly after an already delivered record.
    After(RecordId),
}

impl ReadPosition {
    pub fn admits(&self, id: RecordId) -> bool {
        match self {
            ReadPosition::Beginning => true,
            ReadPosition::After(last) => id > *last,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub stream: String,
    pub id: RecordId,
    pub fields: Fields,
}

impl LogRecord {
    pub fn field(&self, name: &'static str) -> Result<&str, DecodeError> {
        events::field(&self.fields, name)
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("event log unavailable: {0}")]
    Unavailable(String),
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("event log did not answer within {0:?}")]
    Timeout(Duration),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An ordered, durable, append-only log of key/value records.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends one record and returns the id the log assigned to it.
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<RecordId, LogError>;

    /// Returns up to `count` records admitted by `position`, waiting at most
    /// `block` for the first one. An empty batch means the wait elapsed.
    async fn read(
        &self,
        stream: &str,
        position: ReadPosition,
        block: Duration,
        count: usize,
    ) -> Result<Vec<LogRecord>, LogError>;

    /// Id of the newest record in the stream, if any.
    async fn last_id(&self, stream: &str) -> Result<Option<RecordId>, LogError>;

    /// No-op round trip used by readiness probes.
    async fn ping(&self) -> Result<(), LogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_round_trip_through_text() {
        let id: RecordId = "42".parse().unwrap();
        assert_eq!(id, RecordId::new(42));
        assert_eq!(id.to_string(), "42");
        assert!("42-0".parse::<RecordId>().is_err());
    }

    #[test]
    fn positions_admit_only_newer_records() {
        let after = ReadPosition::After(RecordId::new(5));
        assert!(!after.admits(RecordId::new(5)));
        assert!(after.admits(RecordId::new(6)));
        assert!(ReadPosition::Beginning.admits(RecordId::new(0)));
    }
}
