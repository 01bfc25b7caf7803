//! Periodic background tasks
//!
//! A [`ScheduledTask`] drives one [`Job`] on a fixed-period timer that fires
//! immediately and then every `interval`, measured from the previous firing.
//! Cancelling stops the timer; a firing already in progress runs to
//! completion. Jobs own their state, so a new task always starts from a
//! fresh cursor.

mod loader;
mod polling;

pub use loader::{BulkLoader, LoaderState};
pub use polling::PollingJob;

use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Work run on every timer tick
#[async_trait]
pub trait Job: Send + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Run one firing. Failures are handled inside; the timer keeps going.
    async fn fire(&mut self);
}

/// A running periodic job
pub struct ScheduledTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl ScheduledTask {
    /// Start firing `job` every `interval`
    pub fn start<J: Job>(mut job: J, interval: Duration) -> Self {
        let name = job.name();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // A tick already due when an overrunning firing ends must not
                // win over a cancel issued during that firing.
                if token.is_cancelled() {
                    break;
                }
                job.fire().await;
            }
            debug!(task = name, "Scheduled task stopped");
        });

        debug!(task = name, interval_ms = interval.as_millis() as u64, "Scheduled task started");
        Self {
            name,
            cancel,
            handle,
        }
    }

    /// Job name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the timer
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the timer loop has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the current firing, if any, to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
