use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Upper bound for a single dependency probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
}

/// Runs `check` with a deadline; a timeout counts as down.
pub async fn probe<F, E>(name: &'static str, timeout: Duration, check: F) -> ProbeStatus
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(())) => ProbeStatus::Up,
        Ok(Err(e)) => {
            warn!(dependency = name, error = %e, "Readiness probe failed");
            ProbeStatus::Down
        }
        Err(_) => {
            warn!(dependency = name, ?timeout, "Readiness probe timed out");
            ProbeStatus::Down
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub status: &'static str,
    pub checks: BTreeMap<&'static str, ProbeStatus>,
}

impl ReadinessReport {
    pub fn new(checks: impl IntoIterator<Item = (&'static str, ProbeStatus)>) -> Self {
        let checks: BTreeMap<_, _> = checks.into_iter().collect();
        let ready = checks.values().all(|status| *status == ProbeStatus::Up);
        Self {
            status: if ready { "ready" } else { "not_ready" },
            checks,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}
