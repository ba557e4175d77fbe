use clap::Args;
use std::time::Duration;

use crate::kafka::KafkaConfig;
use crate::worker::{Backoff, WorkerConfig};

/// Event log and consumer settings common to every service.
#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    pub kafka_brokers: String,

    /// Longest a consumer's blocking read waits, in milliseconds.
    #[arg(long, env = "READ_BLOCK_MS", default_value_t = 5000)]
    pub read_block_ms: u64,

    #[arg(long, env = "READ_BATCH_SIZE", default_value_t = 16)]
    pub read_batch_size: usize,

    #[arg(long, env = "RETRY_BASE_MS", default_value_t = 500)]
    pub retry_base_ms: u64,

    #[arg(long, env = "RETRY_MAX_MS", default_value_t = 5000)]
    pub retry_max_ms: u64,

    /// Stop a consumer after this many consecutive failures instead of
    /// retrying forever.
    #[arg(long, env = "RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: Option<u32>,
}

impl LogArgs {
    pub fn kafka(&self, group_id: &str) -> KafkaConfig {
        KafkaConfig::new(&self.kafka_brokers, group_id)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.retry_base_ms),
            max: Duration::from_millis(self.retry_max_ms),
            max_attempts: self.retry_max_attempts,
        }
    }

    pub fn worker(&self, consumer_name: &str, stream: &str) -> WorkerConfig {
        WorkerConfig {
            block: Duration::from_millis(self.read_block_ms),
            batch_size: self.read_batch_size,
            backoff: self.backoff(),
            ..WorkerConfig::new(consumer_name, stream)
        }
    }
}
