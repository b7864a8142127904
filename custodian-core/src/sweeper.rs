//! Background expiry of timed-out sessions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::controller::SessionService;

/// Spawn a task that expires due sessions every `sweep_interval`.
///
/// The task stops when `shutdown` is cancelled. A sweep in progress runs to
/// completion first, so handler deadlines are still honoured.
pub fn spawn_expiry_sweeper(
    service: Arc<SessionService>,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Expiry sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let expired = service.sweep_expired(Utc::now()).await;
            if expired > 0 {
                info!(expired, "Session expiry sweep completed");
            } else {
                debug!("Session expiry sweep: no expired sessions");
            }
            debug!(
                active_sessions = service.active_sessions(),
                registered = service.registry().len(),
                "Session registry status"
            );
        }
    })
}
