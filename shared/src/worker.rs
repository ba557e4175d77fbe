//! Supervised consumer loop shared by every stream consumer.
//!
//! A worker moves through `Connecting -> Listening -> Processing ->
//! Listening -> ...`. Errors talking to the log move it to `Reconnecting`,
//! where it backs off and retries the same read position, so nothing is
//! skipped. The cursor advances only once a record's side effects are
//! applied; it is persisted through a [`CursorStore`] so a restart resumes
//! where the previous process stopped.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cursor::CursorStore;
use crate::log::{EventLog, LogRecord, ReadPosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Connecting,
    Listening,
    Processing,
    Reconnecting { attempt: u32 },
    Stopped,
}

/// Linear backoff capped at `max`: `min(base * attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt.max(1)).min(self.max)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

/// How a handler failed.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Transient infrastructure failure; the same record is retried.
    #[error("transient failure: {0:#}")]
    Retry(anyhow::Error),
    /// The record can never be processed; it is logged and passed over.
    #[error("record rejected: {0:#}")]
    Skip(anyhow::Error),
}

#[async_trait]
pub trait RecordHandler: Send + Sync {
    async fn handle(&self, record: &LogRecord) -> Result<(), HandlerError>;
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("consumer `{consumer}` gave up after {attempts} attempts: {reason}")]
    RetriesExhausted {
        consumer: String,
        attempts: u32,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Names the consumer in logs and in the cursor store.
    pub consumer_name: String,
    pub stream: String,
    /// Longest a single blocking read waits before the loop turns over.
    pub block: Duration,
    pub batch_size: usize,
    pub backoff: Backoff,
}

impl WorkerConfig {
    pub fn new(consumer_name: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            consumer_name: consumer_name.into(),
            stream: stream.into(),
            block: Duration::from_secs(5),
            batch_size: 16,
            backoff: Backoff::default(),
        }
    }
}

enum Outcome {
    Done,
    Interrupted,
}

/// Tracks one run of consecutive failures so an outage is logged once at
/// onset and once at recovery, not on every retry.
struct Failures {
    attempt: u32,
}

impl Failures {
    fn new() -> Self {
        Self { attempt: 0 }
    }

    fn record(&mut self, consumer: &str, what: &str, reason: &dyn std::fmt::Display) -> u32 {
        self.attempt += 1;
        if self.attempt == 1 {
            error!(consumer, error = %reason, "{what} failed, retrying");
        } else {
            debug!(consumer, attempt = self.attempt, error = %reason, "{what} still failing");
        }
        self.attempt
    }

    fn recover(&mut self, consumer: &str, what: &str) {
        if self.attempt > 0 {
            info!(consumer, attempts = self.attempt, "{what} recovered");
            self.attempt = 0;
        }
    }
}

pub struct StreamWorker<H> {
    config: WorkerConfig,
    log: Arc<dyn EventLog>,
    cursors: Arc<dyn CursorStore>,
    handler: H,
    state: watch::Sender<ConsumerState>,
}

impl<H: RecordHandler> StreamWorker<H> {
    pub fn new(
        config: WorkerConfig,
        log: Arc<dyn EventLog>,
        cursors: Arc<dyn CursorStore>,
        handler: H,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Connecting);
        Self {
            config,
            log,
            cursors,
            handler,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    /// Runs until `shutdown` is cancelled. Returns an error only when a
    /// retry cap is configured and exhausted.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        let consumer = self.config.consumer_name.clone();
        info!(consumer, stream = %self.config.stream, "Starting stream consumer");

        let mut failures = Failures::new();
        let mut position: Option<ReadPosition> = None;
        let mut start_failed = false;

        while !shutdown.is_cancelled() {
            let from = match position {
                Some(from) => from,
                None => {
                    self.set_state(ConsumerState::Connecting);
                    match self.resolve_start(start_failed).await {
                        Ok(from) => {
                            failures.recover(&consumer, "Connecting to event log");
                            info!(consumer, position = ?from, "Consumer position resolved");
                            position = Some(from);
                            from
                        }
                        Err(reason) => {
                            start_failed = true;
                            let attempt = failures.record(&consumer, "Connecting to event log", &reason);
                            self.back_off(attempt, &reason, &shutdown).await?;
                            continue;
                        }
                    }
                }
            };

            self.set_state(ConsumerState::Listening);
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                read = self.log.read(
                    &self.config.stream,
                    from,
                    self.config.block,
                    self.config.batch_size,
                ) => read,
            };

            let records = match read {
                Ok(records) => {
                    failures.recover(&consumer, "Reading event log");
                    records
                }
                Err(e) => {
                    let reason = anyhow::Error::from(e);
                    let attempt = failures.record(&consumer, "Reading event log", &reason);
                    self.back_off(attempt, &reason, &shutdown).await?;
                    continue;
                }
            };

            for record in records {
                if shutdown.is_cancelled() {
                    break;
                }
                self.set_state(ConsumerState::Processing);
                match self.process(&record, &shutdown).await? {
                    Outcome::Done => {
                        position = Some(ReadPosition::After(record.id));
                        self.persist_cursor(&record).await;
                    }
                    Outcome::Interrupted => break,
                }
            }
        }

        self.set_state(ConsumerState::Stopped);
        info!(consumer, "Stream consumer stopped");
        Ok(())
    }

    /// Saved cursor if there is one, otherwise the current end of the
    /// stream so that only new records are delivered.
    ///
    /// When an earlier attempt failed, records may have been appended
    /// while we were backing off; with no cursor to tell them apart the
    /// stream is read from the beginning and handlers see redeliveries.
    async fn resolve_start(&self, after_failure: bool) -> anyhow::Result<ReadPosition> {
        let saved = self
            .cursors
            .load(&self.config.consumer_name, &self.config.stream)
            .await?;
        if let Some(id) = saved {
            return Ok(ReadPosition::After(id));
        }
        if after_failure {
            warn!(
                consumer = %self.config.consumer_name,
                "No saved cursor after a failed start, reading stream from the beginning"
            );
            return Ok(ReadPosition::Beginning);
        }

        match self.log.last_id(&self.config.stream).await? {
            Some(id) => {
                // Pin "latest" now so records appended before the first
                // processed one survive a restart.
                self.cursors
                    .save(&self.config.consumer_name, &self.config.stream, id)
                    .await?;
                Ok(ReadPosition::After(id))
            }
            None => Ok(ReadPosition::Beginning),
        }
    }

    async fn process(&self, record: &LogRecord, shutdown: &CancellationToken) -> Result<Outcome, WorkerError> {
        let consumer = self.config.consumer_name.as_str();
        let mut failures = Failures::new();

        loop {
            match self.handler.handle(record).await {
                Ok(()) => {
                    failures.recover(consumer, "Record processing");
                    debug!(consumer, record_id = %record.id, "Record processed");
                    return Ok(Outcome::Done);
                }
                Err(HandlerError::Skip(reason)) => {
                    warn!(consumer, record_id = %record.id, error = %format!("{reason:#}"), "Skipping record");
                    return Ok(Outcome::Done);
                }
                Err(HandlerError::Retry(reason)) => {
                    let attempt = failures.record(consumer, "Record processing", &format!("{reason:#}"));
                    if !self.back_off(attempt, &reason, shutdown).await? {
                        warn!(consumer, record_id = %record.id, "Shutdown while retrying; record will be redelivered");
                        return Ok(Outcome::Interrupted);
                    }
                }
            }
        }
    }

    /// Sleeps for the backoff delay. Returns `Ok(false)` when interrupted
    /// by shutdown.
    async fn back_off(
        &self,
        attempt: u32,
        reason: &anyhow::Error,
        shutdown: &CancellationToken,
    ) -> Result<bool, WorkerError> {
        let backoff = self.config.backoff;
        if backoff.exhausted(attempt) {
            return Err(WorkerError::RetriesExhausted {
                consumer: self.config.consumer_name.clone(),
                attempts: attempt - 1,
                reason: format!("{reason:#}"),
            });
        }

        self.set_state(ConsumerState::Reconnecting { attempt });
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Ok(false),
            _ = tokio::time::sleep(backoff.delay(attempt)) => Ok(true),
        }
    }

    async fn persist_cursor(&self, record: &LogRecord) {
        if let Err(e) = self
            .cursors
            .save(&self.config.consumer_name, &self.config.stream, record.id)
            .await
        {
            warn!(
                consumer = %self.config.consumer_name,
                record_id = %record.id,
                error = %e,
                "Failed to persist consumer cursor"
            );
        }
    }
}
