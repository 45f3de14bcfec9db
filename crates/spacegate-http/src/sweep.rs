//! Cancellable periodic background tasks.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Handle to a periodic task running on the tokio runtime.
///
/// The task runs `job` once per interval until [`PeriodicSweep::shutdown`] is
/// called. The first run happens one full interval after spawning.
#[derive(Debug)]
pub struct PeriodicSweep {
    name: &'static str,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicSweep {
    /// Spawn `job` to run every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(name: &'static str, interval: Duration, mut job: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!(sweep = name, "Running periodic sweep");
                        job();
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!(sweep = name, "Periodic sweep stopped");
        });
        info!(sweep = name, interval_secs = interval.as_secs(), "Started periodic sweep");
        Self { name, stop, handle }
    }

    /// The name given at spawn time.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(sweep = self.name, error = %e, "Periodic sweep task failed");
        }
    }
}
