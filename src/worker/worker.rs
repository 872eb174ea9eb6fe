//! Worker main loop — claim, lock, dispatch, verify, report, clean up.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, RedisBroker};
use crate::config::WorkerConfig;
use crate::error::{BrokerError, ConfigError, Error, JobError, PipelineError, Result};
use crate::model::{CurrentJob, ResultRecord};
use crate::pipeline::{FileStore, JobRequest, Pipeline, PipelineRegistry};
use crate::worker::heartbeat::{Heartbeat, spawn_heartbeat};
use crate::worker::identity::WorkerId;
use crate::worker::lock::{LockGuard, LockStatus};
use crate::worker::log::{LogEmitter, LogSender, log_channel, spawn_log_emitter};
use crate::worker::state::{RuntimeState, ShutdownHandle, WorkerPhase};

/// How a claimed job left the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Result reported and records cleaned up.
    Completed,
    /// Lock lost before reporting. Records left for the new owner.
    LockLost,
    /// Error reported and records cleaned up.
    Failed,
}

/// Pending queues to wait on, and which pipeline each one feeds.
struct Queues {
    pending: Vec<String>,
    pipelines: HashMap<String, String>,
}

/// A single-job-at-a-time queue worker.
pub struct Worker {
    id: WorkerId,
    config: WorkerConfig,
    broker: Arc<dyn Broker>,
    pipelines: PipelineRegistry,
    state: Arc<RuntimeState>,
    lock: LockGuard,
    logs: LogSender,
    /// Taken by the first `start()` or `run_once()`.
    emitter: Mutex<Option<LogEmitter>>,
}

impl Worker {
    /// Create a worker over an already connected broker.
    pub fn new(broker: Arc<dyn Broker>, config: WorkerConfig) -> Self {
        let id = WorkerId::generate();
        let state = RuntimeState::new();
        let lock = LockGuard::new(
            Arc::clone(&broker),
            config.keys.clone(),
            id.clone(),
            Arc::clone(&state),
        );
        let (logs, emitter) = log_channel(
            Arc::clone(&broker),
            config.keys.log(),
            id.clone(),
            Arc::clone(&state),
            config.log_poll_interval,
        );

        Self {
            id,
            config,
            broker,
            pipelines: PipelineRegistry::new(),
            state,
            lock,
            logs,
            emitter: Mutex::new(Some(emitter)),
        }
    }

    /// Connect to Redis using `config` and create a worker.
    ///
    /// Fails if the connection settings are invalid or the store cannot be
    /// reached.
    pub async fn connect(config: WorkerConfig) -> Result<Self> {
        let broker = RedisBroker::connect(config.connection_info()?).await?;
        Ok(Self::new(Arc::new(broker), config))
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    /// Register a handler for jobs on `queue:{name}:pending`.
    pub async fn add_pipeline(&self, name: impl Into<String>, pipeline: Arc<dyn Pipeline>) {
        self.pipelines.register(name, pipeline).await;
    }

    /// Handle for stopping the worker from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(Arc::clone(&self.state))
    }

    /// Request shutdown. Background loops notice within one polling interval;
    /// the main loop stops at its next pop or handler boundary.
    pub fn stop(&self) {
        self.state.request_exit();
    }

    /// Run the worker until `stop()` is called or a fatal error occurs.
    ///
    /// A stop request interrupts a pending pop or a running handler without
    /// reporting or cleaning up; the job's records stay for the supervisor to
    /// reclaim. Once a handler has returned, its report and cleanup finish
    /// before the stop is honoured.
    pub async fn start(&self) -> Result<()> {
        info!("Starting worker...");
        self.broker.ping().await?;

        let queues = self.queues().await?;
        let handles = self.spawn_background().await?;

        info!(
            worker_id = %self.id,
            pipelines = ?queues.pipelines.values().collect::<Vec<_>>(),
            "Worker ready to accept jobs"
        );

        let result: Result<()> = loop {
            if self.state.is_exiting() {
                break Err(JobError::Shutdown.into());
            }
            if let Err(e) = self.process_next(&queues).await {
                break Err(e);
            }
        };

        self.stop_background(handles).await;

        match result {
            Err(Error::Job(JobError::Shutdown)) => {
                self.warn_abandoned();
                info!("Worker stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Worker stopped on fatal error");
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    /// Wait for and process exactly one job, then stop.
    ///
    /// Runs the heartbeat and log emitter for the duration of the job and
    /// flushes queued log lines before returning. Like `start()`, it can only
    /// be called once per worker.
    pub async fn run_once(&self) -> Result<JobOutcome> {
        let queues = self.queues().await?;
        let handles = self.spawn_background().await?;

        let outcome = self.process_next(&queues).await;
        self.stop_background(handles).await;

        if let Err(Error::Job(JobError::Shutdown)) = &outcome {
            self.warn_abandoned();
        }
        outcome
    }

    /// Spawn the log emitter and heartbeat. Fails on a second call.
    async fn spawn_background(&self) -> Result<Vec<JoinHandle<()>>> {
        let emitter = self.emitter.lock().await.take().ok_or(Error::AlreadyStarted)?;
        let heartbeat = Heartbeat::new(
            Arc::clone(&self.broker),
            self.config.keys.clone(),
            self.lock.clone(),
            Arc::clone(&self.state),
            self.config.heartbeat_interval,
        );
        Ok(vec![spawn_log_emitter(emitter), spawn_heartbeat(heartbeat)])
    }

    async fn stop_background(&self, handles: Vec<JoinHandle<()>>) {
        // Fatal errors also bring the background loops down.
        self.state.request_exit();
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!(error = %e, "Background loop ended abnormally");
            }
        }
    }

    fn warn_abandoned(&self) {
        if let Some(job) = self.state.current_job() {
            warn!(
                job_id = %job.job_id,
                pipeline = %job.pipeline,
                phase = %self.state.phase(),
                "Stopped mid-job, leaving its records in place"
            );
        }
    }

    /// Run `fut` unless exit is requested first.
    async fn until_exit<T>(&self, fut: impl Future<Output = T>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.state.exited() => Err(JobError::Shutdown.into()),
            out = fut => Ok(out),
        }
    }

    async fn queues(&self) -> Result<Queues> {
        let names = self.pipelines.names().await;
        if names.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "pipelines".to_string(),
                message: "no pipelines registered".to_string(),
            }
            .into());
        }

        let pending = names.iter().map(|n| self.config.keys.pending(n)).collect();
        let pipelines = names
            .into_iter()
            .map(|n| (self.config.keys.pending(&n), n))
            .collect();
        Ok(Queues { pending, pipelines })
    }

    async fn process_next(&self, queues: &Queues) -> Result<JobOutcome> {
        let job = self.claim(queues).await?;
        let outcome = self.execute(&job).await?;
        self.state.transition_to(WorkerPhase::Idle);
        debug!(job_id = %job.job_id, ?outcome, "Job done");
        Ok(outcome)
    }

    // ── Idle → Claimed ──────────────────────────────────────────────

    async fn claim(&self, queues: &Queues) -> Result<CurrentJob> {
        let (queue, job_id) = self
            .until_exit(self.broker.blocking_pop(&queues.pending))
            .await??;
        let pipeline = queues
            .pipelines
            .get(&queue)
            .cloned()
            .ok_or_else(|| BrokerError::Decode {
                command: "BRPOP".to_string(),
                reason: format!("popped from unknown queue {queue}"),
            })?;

        self.broker
            .lpush(&self.config.keys.processing(&pipeline), &job_id)
            .await?;

        let job = CurrentJob { job_id, pipeline };
        self.state.set_current(job.clone());
        self.state.transition_to(WorkerPhase::Claimed);

        info!(job_id = %job.job_id, pipeline = %job.pipeline, "Claimed job");
        self.logs.log(
            Some(&job.job_id),
            format!("Received {} job {}", job.pipeline, job.job_id),
        );
        Ok(job)
    }

    // ── Claimed → Locked → Dispatched → outcome ─────────────────────

    async fn execute(&self, job: &CurrentJob) -> Result<JobOutcome> {
        let args = match self.load_arguments(job).await? {
            Ok(args) => args,
            Err(invalid) => return self.fail(job, invalid).await,
        };

        self.lock.acquire(job).await?;
        self.state.transition_to(WorkerPhase::Locked);
        self.logs.log(
            Some(&job.job_id),
            format!("Processing {} job {}", job.pipeline, job.job_id),
        );

        let request = JobRequest::new(
            job.job_id.clone(),
            job.pipeline.clone(),
            args,
            FileStore::new(Arc::clone(&self.broker), self.config.keys.files()),
            self.logs.clone(),
        );

        self.state.transition_to(WorkerPhase::Dispatched);
        let dispatch = AssertUnwindSafe(self.pipelines.dispatch(request)).catch_unwind();
        let dispatched = self
            .until_exit(dispatch)
            .await?
            .unwrap_or_else(|panic| Err(PipelineError::Panicked(panic_message(&*panic))));

        match dispatched {
            Ok(result) => self.complete(job, result).await,
            Err(source) => {
                let failure = JobError::HandlerFailure {
                    job_id: job.job_id.clone(),
                    source,
                };
                self.fail(job, failure).await
            }
        }
    }

    /// Read and parse the job's argument record.
    ///
    /// The outer error is a store failure; the inner one a reportable
    /// payload problem.
    async fn load_arguments(
        &self,
        job: &CurrentJob,
    ) -> Result<std::result::Result<Value, JobError>> {
        let raw = self.broker.hget(&self.config.keys.jobs(), &job.job_id).await?;
        let parsed = match raw {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| JobError::InvalidPayload {
                job_id: job.job_id.clone(),
                reason: format!("job arguments are not valid JSON: {e}"),
            }),
            None => Err(JobError::InvalidPayload {
                job_id: job.job_id.clone(),
                reason: "job arguments not found".to_string(),
            }),
        };
        Ok(parsed)
    }

    /// Success path: report only if the lock survived the handler.
    async fn complete(&self, job: &CurrentJob, result: Value) -> Result<JobOutcome> {
        match self.lock.status_of(&job.job_id).await? {
            LockStatus::Held => {
                self.report(ResultRecord::Success {
                    job_id: job.job_id.clone(),
                    result,
                })
                .await?;
                self.lock.cleanup().await?;
                self.state.transition_to(WorkerPhase::Reported);

                info!(job_id = %job.job_id, pipeline = %job.pipeline, "Job completed");
                self.logs.log(
                    Some(&job.job_id),
                    format!("Finished processing {} job {}", job.pipeline, job.job_id),
                );
                Ok(JobOutcome::Completed)
            }
            LockStatus::Lost { owner } => {
                let lost = JobError::LockLost {
                    job_id: job.job_id.clone(),
                    owner,
                };
                warn!(pipeline = %job.pipeline, "{lost}");
                self.logs
                    .log(Some(&job.job_id), format!("Lost lock for job {}", job.job_id));

                // The new owner finishes and cleans up; only forget it here.
                self.state.clear_current();
                self.state.transition_to(WorkerPhase::LockLost);
                Ok(JobOutcome::LockLost)
            }
        }
    }

    /// Error path: report the failure, log the detail, clean up.
    async fn fail(&self, job: &CurrentJob, failure: JobError) -> Result<JobOutcome> {
        self.report(ResultRecord::Failure {
            job_id: job.job_id.clone(),
            error: failure.report_message(),
        })
        .await?;

        error!(job_id = %job.job_id, pipeline = %job.pipeline, error = %failure, "Job failed");
        self.logs.log(
            Some(&job.job_id),
            format!("Error processing {} job {}", job.pipeline, job.job_id),
        );
        self.logs.log(Some(&job.job_id), error_detail(&failure));

        self.lock.cleanup().await?;
        self.state.transition_to(WorkerPhase::Errored);
        Ok(JobOutcome::Failed)
    }

    async fn report(&self, record: ResultRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        self.broker.rpush(&self.config.keys.results(), &line).await?;
        Ok(())
    }
}

/// Render an error and its sources, one per line.
fn error_detail(err: &(dyn std::error::Error + 'static)) -> String {
    let mut detail = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push_str("\ncaused by: ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
