//! Background refresh loop.
//!
//! The backend has no push channel, so each role session polls its store on a
//! fixed interval. The first refresh runs immediately; afterwards the loop
//! sleeps between cycles. A failed cycle is logged and the loop waits for the
//! next tick rather than retrying straight away. Cancelling abandons a cycle
//! in flight; its result is never applied.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{ReconciliationStore, RefreshOutcome, RoleFeed};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Spawn the refresh loop for `store`. The task ends once `cancel` fires.
pub fn start_refresh_loop<F: RoleFeed>(
    store: Arc<ReconciliationStore<F>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let role = store.role();
        info!(role = %role, interval_secs = interval.as_secs_f64(), "Refresh loop started");
        let mut consecutive_failures: u32 = 0;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(role = %role, "Refresh abandoned on cancel");
                    break;
                }
                result = store.refresh() => result,
            };
            match result {
                Ok(RefreshOutcome::Applied { notified, .. }) => {
                    if consecutive_failures > 0 {
                        info!(role = %role, after = consecutive_failures, "Backend reachable again");
                    }
                    consecutive_failures = 0;
                    if notified > 0 {
                        debug!(role = %role, notified, "Refresh produced notifications");
                    }
                }
                Ok(RefreshOutcome::Skipped) => {}
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        role = %role,
                        error = %e,
                        retryable = e.is_retryable(),
                        consecutive_failures,
                        "Refresh cycle failed"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(role = %role, "Refresh loop stopped");
    })
}
