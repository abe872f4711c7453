//! Recurring heartbeat task.
//!
//! Started when the link reaches Connected and owned by the connection
//! driver, which stops it exactly once when the link goes away.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

/// Something that can emit one heartbeat (a signed PING).
pub trait Heartbeat: Debug + Send + Sync + 'static {
    /// Emits one heartbeat.
    ///
    /// # Errors
    ///
    /// Returns the dispatch error; the task logs it and keeps ticking.
    fn beat(&self) -> Result<(), ClientError>;
}

/// Handle to a running heartbeat task.
#[derive(Debug)]
pub struct HeartbeatTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatTask {
    /// Spawns a task that calls [`Heartbeat::beat`] every `interval`, first
    /// one `interval` from now, until `token` is cancelled.
    #[must_use]
    pub fn spawn(
        interval: Duration,
        heartbeat: Arc<dyn Heartbeat>,
        token: CancellationToken,
    ) -> Self {
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    () = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = heartbeat.beat() {
                            tracing::warn!(error = %e, "heartbeat failed");
                        }
                    }
                }
            }
            tracing::debug!("heartbeat task stopped");
        });
        Self { token, handle }
    }

    /// Cancels the task and waits for it to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "heartbeat task did not shut down cleanly");
        }
    }
}
