//! Poll loop shared by the background senders: run a cycle, sleep, back off on store outages.

use crate::store::StoreError;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

const MAX_BACKOFF_FACTOR: u32 = 8;

/// Delay before the next cycle after `failures` consecutive listing failures.
///
/// Doubles from `base` up to eight times `base`, then picks uniformly from the upper half.
pub fn backoff_delay(base: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return base;
    }
    let factor = 2u32.saturating_pow(failures - 1).min(MAX_BACKOFF_FACTOR);
    let ceiling = base.saturating_mul(factor);
    let floor = ceiling / 2;
    if ceiling <= floor {
        return ceiling;
    }
    rand::thread_rng().gen_range(floor..=ceiling)
}

/// One pass over a table of pending records.
#[async_trait]
pub trait PollingCycle: Send + Sync {
    /// Per-record results of a pass.
    type Report: Send;

    /// Name used in log events.
    fn label(&self) -> &'static str;

    /// Attempt every pending record once. `Err` means the pending records could not be listed.
    async fn run_cycle(&self) -> Result<Self::Report, StoreError>;

    /// Log a finished pass.
    fn log_report(&self, report: &Self::Report);
}

/// Run `cycle` every `interval` until `shutdown` changes or its sender is dropped.
pub async fn poll_until_shutdown<C: PollingCycle>(
    cycle: &C,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures = 0;
    loop {
        let delay = match cycle.run_cycle().await {
            Ok(report) => {
                failures = 0;
                cycle.log_report(&report);
                interval
            }
            Err(error) => {
                failures += 1;
                let delay = backoff_delay(interval, failures);
                warn!(
                    task = cycle.label(),
                    error = %error,
                    failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Failed to list pending records"
                );
                delay
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!(task = cycle.label(), "Polling stopped");
}
