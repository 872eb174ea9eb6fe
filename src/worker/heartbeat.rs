//! Heartbeat — periodic lock re-check and liveness write for the held job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::config::KeySpace;
use crate::error::{Error, JobError};
use crate::model::liveness_timestamp;
use crate::worker::lock::LockGuard;
use crate::worker::state::{RuntimeState, WorkerPhase};

/// Writes `last_updates[job_id] = <unix seconds>` while a job is held.
pub struct Heartbeat {
    broker: Arc<dyn Broker>,
    keys: KeySpace,
    guard: LockGuard,
    state: Arc<RuntimeState>,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(
        broker: Arc<dyn Broker>,
        keys: KeySpace,
        guard: LockGuard,
        state: Arc<RuntimeState>,
        interval: Duration,
    ) -> Self {
        Self {
            broker,
            keys,
            guard,
            state,
            interval,
        }
    }

    /// Run until the exit flag is seen. Failures are logged, never fatal.
    pub async fn run(self) {
        debug!(interval = ?self.interval, "Heartbeat started");
        while !self.state.is_exiting() {
            self.beat().await;
            tokio::time::sleep(self.interval).await;
        }
        debug!("Heartbeat stopped");
    }

    /// One heartbeat: check the lock, then record liveness if it is ours.
    ///
    /// Returns whether a liveness record was written.
    pub async fn beat(&self) -> bool {
        let _records = self.guard.records().await;
        // Nothing to vouch for until the lock is written
        if !matches!(
            self.state.phase(),
            WorkerPhase::Locked | WorkerPhase::Dispatched
        ) {
            return false;
        }
        let Some(job) = self.state.current_job() else {
            return false;
        };

        match self.guard.verify().await {
            Ok(()) => {}
            Err(Error::Job(err @ JobError::LockLost { .. })) => {
                // The main loop's post-handler check decides what happens to
                // the job; here we just stop vouching for it.
                warn!(job_id = %job.job_id, error = %err, "Heartbeat found lock lost");
                return false;
            }
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Heartbeat lock check failed");
                return false;
            }
        }

        let timestamp = liveness_timestamp(Utc::now());
        match self
            .broker
            .hset(&self.keys.liveness(), &job.job_id, &timestamp)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Failed to write liveness");
                false
            }
        }
    }
}

/// Spawn the heartbeat loop.
pub fn spawn_heartbeat(heartbeat: Heartbeat) -> JoinHandle<()> {
    tokio::spawn(heartbeat.run())
}
