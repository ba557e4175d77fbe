use anyhow::Result;
use shared::EventLog;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::store::OrderStore;

/// Relays committed outbox entries to the event log.
///
/// An entry is marked published only after the log confirmed the append,
/// so every committed order produces its event at least once.
pub struct OutboxRelay {
    store: Arc<dyn OrderStore>,
    log: Arc<dyn EventLog>,
    wake: Arc<Notify>,
    interval: Duration,
    batch_size: i64,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn OrderStore>, log: Arc<dyn EventLog>, wake: Arc<Notify>) -> Self {
        Self {
            store,
            log,
            wake,
            interval: Duration::from_secs(1),
            batch_size: 100,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failing = false;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = interval.tick() => {}
            }

            match self.process_outbox_events().await {
                Ok(published) => {
                    if failing {
                        info!(published, "Outbox relay recovered");
                        failing = false;
                    }
                }
                Err(e) => {
                    if !failing {
                        error!("Error processing outbox events: {:#}", e);
                        failing = true;
                    } else {
                        debug!("Outbox relay still failing: {:#}", e);
                    }
                }
            }
        }

        info!("Outbox relay stopped");
    }

    /// Publishes pending entries in creation order and returns how many were
    /// published. Stops at the first failure so later entries never overtake
    /// an earlier one on the same stream.
    pub async fn process_outbox_events(&self) -> Result<usize> {
        let pending = self.store.pending_outbox(self.batch_size).await?;
        let mut published = 0;

        for entry in pending {
            let record_id = self.log.append(&entry.stream, &entry.fields).await?;
            self.store.mark_published(entry.id).await?;
            published += 1;

            info!(
                outbox_id = %entry.id,
                order_id = entry.order_id,
                event_type = %entry.event_type,
                stream = %entry.stream,
                %record_id,
                "Published outbox event"
            );
        }

        Ok(published)
    }
}
