//! In-process implementations of the log and cursor seams, used by tests
//! and local runs. They follow the same contracts as the Kafka and
//! PostgreSQL implementations.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

use crate::cursor::{CursorError, CursorStore};
use crate::events::Fields;
use crate::log::{EventLog, LogError, LogRecord, ReadPosition, RecordId};

struct LogInner {
    streams: Mutex<HashMap<String, Vec<LogRecord>>>,
    appended: Notify,
    available: AtomicBool,
    rejected_calls: AtomicUsize,
}

/// Event log held in memory. It can be switched offline to simulate a
/// broker outage; while offline every call fails with `Unavailable`.
#[derive(Clone)]
pub struct MemoryEventLog {
    inner: Arc<LogInner>,
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LogInner {
                streams: Mutex::new(HashMap::new()),
                appended: Notify::new(),
                available: AtomicBool::new(true),
                rejected_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
        // Wake blocked readers so they observe the change.
        self.inner.appended.notify_waiters();
    }

    /// Number of calls refused while the log was offline.
    pub fn rejected_calls(&self) -> usize {
        self.inner.rejected_calls.load(Ordering::SeqCst)
    }

    pub fn records(&self, stream: &str) -> Vec<LogRecord> {
        self.streams().get(stream).cloned().unwrap_or_default()
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<String, Vec<LogRecord>>> {
        self.inner
            .streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), LogError> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            self.inner.rejected_calls.fetch_add(1, Ordering::SeqCst);
            Err(LogError::Unavailable("connection refused".to_string()))
        }
    }

    fn collect(&self, stream: &str, position: ReadPosition, count: usize) -> Vec<LogRecord> {
        self.streams()
            .get(stream)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| position.admits(record.id))
                    .take(count.max(1))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<RecordId, LogError> {
        self.check_available()?;
        let id = {
            let mut streams = self.streams();
            let records = streams.entry(stream.to_string()).or_default();
            let id = RecordId::new(records.len() as i64);
            records.push(LogRecord {
                stream: stream.to_string(),
                id,
                fields: Fields::from(fields),
            });
            id
        };
        self.inner.appended.notify_waiters();
        Ok(id)
    }

    async fn read(
        &self,
        stream: &str,
        position: ReadPosition,
        block: Duration,
        count: usize,
    ) -> Result<Vec<LogRecord>, LogError> {
        let deadline = Instant::now() + block;
        loop {
            // Registered before checking so an append in between is not missed.
            let appended = self.inner.appended.notified();
            self.check_available()?;

            let batch = self.collect(stream, position, count);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn last_id(&self, stream: &str) -> Result<Option<RecordId>, LogError> {
        self.check_available()?;
        Ok(self
            .streams()
            .get(stream)
            .and_then(|records| records.last())
            .map(|record| record.id))
    }

    async fn ping(&self) -> Result<(), LogError> {
        self.check_available()
    }
}

/// Cursor store held in memory; it survives worker restarts within one
/// process, which is enough to exercise resume behaviour in tests.
#[derive(Clone, Default)]
pub struct MemoryCursorStore {
    cursors: Arc<Mutex<HashMap<(String, String), RecordId>>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, consumer: &str, stream: &str) -> Option<RecordId> {
        self.cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(consumer.to_string(), stream.to_string()))
            .copied()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, consumer: &str, stream: &str) -> Result<Option<RecordId>, CursorError> {
        Ok(self.get(consumer, stream))
    }

    async fn save(&self, consumer: &str, stream: &str, id: RecordId) -> Result<(), CursorError> {
        self.cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((consumer.to_string(), stream.to_string()), id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(order_id: &str) -> Fields {
        vec![("order_id".to_string(), order_id.to_string())]
    }

    #[tokio::test]
    async fn read_returns_records_after_the_position() {
        let log = MemoryEventLog::new();
        for id in ["1", "2", "3"] {
            log.append("s", &fields(id)).await.unwrap();
        }

        let batch = log
            .read("s", ReadPosition::After(RecordId::new(0)), Duration::ZERO, 10)
            .await
            .unwrap();
        let ids: Vec<i64> = batch.iter().map(|r| r.id.offset()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn blocked_read_wakes_on_append() {
        let log = MemoryEventLog::new();
        let reader = {
            let log = log.clone();
            tokio::spawn(async move {
                log.read("s", ReadPosition::Beginning, Duration::from_secs(5), 10)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        log.append("s", &fields("7")).await.unwrap();

        let batch = reader.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].field("order_id").unwrap(), "7");
    }

    #[tokio::test]
    async fn empty_batch_when_block_elapses() {
        let log = MemoryEventLog::new();
        let batch = log
            .read("s", ReadPosition::Beginning, Duration::from_millis(10), 10)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn offline_log_refuses_calls() {
        let log = MemoryEventLog::new();
        log.set_available(false);
        assert!(matches!(
            log.append("s", &fields("1")).await,
            Err(LogError::Unavailable(_))
        ));
        assert!(log.ping().await.is_err());
        assert_eq!(log.rejected_calls(), 2);

        log.set_available(true);
        assert!(log.ping().await.is_ok());
        assert_eq!(log.last_id("s").await.unwrap(), None);
    }
}
