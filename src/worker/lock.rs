//! Lock guard — "do I still hold this job", plus per-job cleanup.
//!
//! The lock is an advisory record in the store, written without a
//! compare-and-set. Exclusivity comes from the supervisor only ever putting a
//! job in one worker's hands; this guard only detects a second writer.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::broker::Broker;
use crate::config::KeySpace;
use crate::error::{BrokerError, Error, JobError};
use crate::model::CurrentJob;
use crate::worker::identity::WorkerId;
use crate::worker::state::RuntimeState;

/// What the lock record says about a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// The record holds this worker's identity.
    Held,
    /// The record holds someone else, or nothing.
    Lost { owner: Option<String> },
}

/// Lock checks and cleanup for the job in the shared runtime state.
#[derive(Clone)]
pub struct LockGuard {
    broker: Arc<dyn Broker>,
    keys: KeySpace,
    worker_id: WorkerId,
    state: Arc<RuntimeState>,
    /// Serializes liveness writes against cleanup, so a late heartbeat
    /// cannot recreate a record that was just deleted.
    records: Arc<Mutex<()>>,
}

impl LockGuard {
    pub fn new(
        broker: Arc<dyn Broker>,
        keys: KeySpace,
        worker_id: WorkerId,
        state: Arc<RuntimeState>,
    ) -> Self {
        Self {
            broker,
            keys,
            worker_id,
            state,
            records: Arc::new(Mutex::new(())),
        }
    }

    /// Hold while writing per-job records outside the main loop.
    pub(crate) async fn records(&self) -> MutexGuard<'_, ()> {
        self.records.lock().await
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Write the lock record, overwriting whatever was there.
    pub async fn acquire(&self, job: &CurrentJob) -> Result<(), BrokerError> {
        self.broker
            .hset(&self.keys.locks(), &job.job_id, self.worker_id.as_str())
            .await?;
        debug!(job_id = %job.job_id, worker_id = %self.worker_id, "Lock written");
        Ok(())
    }

    /// Read the lock record for `job_id`.
    pub async fn status_of(&self, job_id: &str) -> Result<LockStatus, BrokerError> {
        let owner = self.broker.hget(&self.keys.locks(), job_id).await?;
        if owner.as_deref() == Some(self.worker_id.as_str()) {
            Ok(LockStatus::Held)
        } else {
            Ok(LockStatus::Lost { owner })
        }
    }

    /// Fail with `LockLost` unless the current job's lock is ours.
    ///
    /// Succeeds trivially when no job is held.
    pub async fn verify(&self) -> Result<(), Error> {
        let Some(job) = self.state.current_job() else {
            return Ok(());
        };
        match self.status_of(&job.job_id).await? {
            LockStatus::Held => Ok(()),
            LockStatus::Lost { owner } => Err(JobError::LockLost {
                job_id: job.job_id,
                owner,
            }
            .into()),
        }
    }

    /// Remove every per-job record for the current job, then forget it.
    ///
    /// No-op when no job is held, so calling it twice is harmless. Returns
    /// whether there was anything to clean.
    pub async fn cleanup(&self) -> Result<bool, BrokerError> {
        let _records = self.records().await;
        let Some(job) = self.state.current_job() else {
            return Ok(false);
        };

        let removed = self
            .broker
            .lrem_all(&self.keys.processing(&job.pipeline), &job.job_id)
            .await?;
        self.broker.hdel(&self.keys.liveness(), &job.job_id).await?;
        self.broker.hdel(&self.keys.locks(), &job.job_id).await?;
        self.broker.hdel(&self.keys.jobs(), &job.job_id).await?;
        self.broker.hdel(&self.keys.files(), &job.job_id).await?;

        self.state.clear_current();
        debug!(job_id = %job.job_id, processing_entries = removed, "Cleaned up job records");
        Ok(true)
    }
}
