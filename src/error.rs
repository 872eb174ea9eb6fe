//! Error types for the job worker.

/// Top-level error type for the worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker already started")]
    AlreadyStarted,
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Shared store errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The store could not be reached. Fatal at startup.
    #[error("Could not connect to store: {0}")]
    Connection(String),

    #[error("Store command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Unexpected reply for {command}: {reason}")]
    Decode { command: String, reason: String },
}

impl BrokerError {
    pub(crate) fn command(command: &str, reason: impl ToString) -> Self {
        Self::Command {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by pipeline handlers.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Domain failure. Renders as the bare message, which is what lands in
    /// the result record.
    #[error("{0}")]
    Failed(String),

    #[error("Invalid job arguments: {0}")]
    InvalidArguments(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No pipeline registered under {0}")]
    NotRegistered(String),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    /// Shorthand for a handler failure with a plain message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Job lifecycle outcomes that leave the happy path.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Another worker's identity is in the lock record (or it is gone).
    #[error("Lost lock for job {job_id} (owner: {})", .owner.as_deref().unwrap_or("none"))]
    LockLost {
        job_id: String,
        owner: Option<String>,
    },

    #[error("Job {job_id} failed: {source}")]
    HandlerFailure {
        job_id: String,
        #[source]
        source: PipelineError,
    },

    #[error("Job {job_id} has an unusable payload: {reason}")]
    InvalidPayload { job_id: String, reason: String },

    /// Operator requested shutdown. Nothing is reported or cleaned up.
    #[error("Shutdown requested")]
    Shutdown,
}

impl JobError {
    /// Message written to the result record for reportable failures.
    pub fn report_message(&self) -> String {
        match self {
            Self::HandlerFailure { source, .. } => source.to_string(),
            Self::InvalidPayload { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for the worker.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_renders_bare_message() {
        let err = JobError::HandlerFailure {
            job_id: "j1".into(),
            source: PipelineError::failed("boom"),
        };
        assert_eq!(err.report_message(), "boom");
        assert_eq!(err.to_string(), "Job j1 failed: boom");
    }

    #[test]
    fn lock_lost_names_owner() {
        let err = JobError::LockLost {
            job_id: "j1".into(),
            owner: Some("other".into()),
        };
        assert_eq!(err.to_string(), "Lost lock for job j1 (owner: other)");

        let err = JobError::LockLost {
            job_id: "j1".into(),
            owner: None,
        };
        assert_eq!(err.to_string(), "Lost lock for job j1 (owner: none)");
    }
}
