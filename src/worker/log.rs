//! Log emitter — drains queued messages into the shared log stream.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::Broker;
use crate::model::LogEntry;
use crate::worker::identity::WorkerId;
use crate::worker::state::RuntimeState;

/// A message waiting to be appended, tagged with the job it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub job_id: Option<String>,
    pub message: String,
}

/// Enqueue side of the log queue. Cheap to clone; never blocks.
#[derive(Clone)]
pub struct LogSender {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl LogSender {
    /// Queue a message for the log stream.
    pub fn log(&self, job_id: Option<&str>, message: impl Into<String>) {
        let queued = LogMessage {
            job_id: job_id.map(str::to_string),
            message: message.into(),
        };
        // Only fails once the emitter is gone, i.e. during shutdown.
        if self.tx.send(queued).is_err() {
            debug!("Log emitter stopped, dropping message");
        }
    }
}

/// Create the log queue: the sender for producers, the emitter for draining.
pub fn log_channel(
    broker: Arc<dyn Broker>,
    log_key: String,
    worker_id: WorkerId,
    state: Arc<RuntimeState>,
    poll_interval: Duration,
) -> (LogSender, LogEmitter) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        LogSender { tx },
        LogEmitter {
            broker,
            log_key,
            worker_id,
            state,
            poll_interval,
            rx,
        },
    )
}

/// Drains the log queue into the store, in enqueue order.
pub struct LogEmitter {
    broker: Arc<dyn Broker>,
    log_key: String,
    worker_id: WorkerId,
    state: Arc<RuntimeState>,
    poll_interval: Duration,
    rx: mpsc::UnboundedReceiver<LogMessage>,
}

impl LogEmitter {
    /// Run until the exit flag is seen, then flush what is already queued.
    pub async fn run(mut self) {
        debug!(key = %self.log_key, "Log emitter started");
        loop {
            if self.state.is_exiting() {
                self.flush().await;
                break;
            }
            match tokio::time::timeout(self.poll_interval, self.rx.recv()).await {
                Ok(Some(queued)) => self.append(queued).await,
                // Every sender dropped
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        debug!("Log emitter stopped");
    }

    async fn flush(&mut self) {
        while let Ok(queued) = self.rx.try_recv() {
            self.append(queued).await;
        }
    }

    async fn append(&self, queued: LogMessage) {
        let entry = LogEntry::new(
            self.worker_id.as_str(),
            queued.job_id,
            Utc::now(),
            queued.message,
        );
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize log entry");
                return;
            }
        };
        if let Err(e) = self.broker.rpush(&self.log_key, &line).await {
            warn!(error = %e, "Failed to append log entry");
        }
    }
}

/// Spawn the log emitter loop.
pub fn spawn_log_emitter(emitter: LogEmitter) -> JoinHandle<()> {
    tokio::spawn(emitter.run())
}
