//! Pipeline handler abstraction.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::broker::Broker;
use crate::error::PipelineError;
use crate::worker::log::LogSender;

/// Read access to job attachments in the `files` hash.
#[derive(Clone)]
pub struct FileStore {
    broker: Arc<dyn Broker>,
    files_key: String,
}

impl FileStore {
    pub fn new(broker: Arc<dyn Broker>, files_key: impl Into<String>) -> Self {
        Self {
            broker,
            files_key: files_key.into(),
        }
    }

    /// Fetch an attachment's bytes.
    pub async fn get(&self, file_id: &str) -> Result<Vec<u8>, PipelineError> {
        self.broker
            .hget_bytes(&self.files_key, file_id)
            .await?
            .ok_or_else(|| PipelineError::FileNotFound(file_id.to_string()))
    }
}

/// Everything a handler gets for one job.
#[derive(Clone)]
pub struct JobRequest {
    pub job_id: String,
    pub pipeline: String,
    /// Parsed job arguments.
    pub args: Value,
    files: FileStore,
    logs: LogSender,
}

impl JobRequest {
    pub fn new(
        job_id: impl Into<String>,
        pipeline: impl Into<String>,
        args: Value,
        files: FileStore,
        logs: LogSender,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            pipeline: pipeline.into(),
            args,
            files,
            logs,
        }
    }

    /// Deserialize the arguments into a handler-specific type.
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T, PipelineError> {
        serde_json::from_value(self.args.clone())
            .map_err(|e| PipelineError::InvalidArguments(e.to_string()))
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    /// The attachment stored under this job's id.
    pub async fn job_file(&self) -> Result<Vec<u8>, PipelineError> {
        self.files.get(&self.job_id).await
    }

    /// Add a progress line to the shared log stream for this job.
    pub fn log(&self, message: impl Into<String>) {
        self.logs.log(Some(&self.job_id), message);
    }
}

/// A job processing function for one pipeline.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Process one job. The returned value becomes the job's `result`.
    async fn run(&self, job: JobRequest) -> Result<Value, PipelineError>;
}

/// Adapter turning an async closure into a `Pipeline`.
pub struct FnPipeline<F> {
    f: F,
}

impl<F> FnPipeline<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Pipeline for FnPipeline<F>
where
    F: Fn(JobRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, PipelineError>> + Send + 'static,
{
    async fn run(&self, job: JobRequest) -> Result<Value, PipelineError> {
        (self.f)(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::worker::identity::WorkerId;
    use crate::worker::log::log_channel;
    use crate::worker::state::RuntimeState;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    fn request(broker: Arc<MemoryBroker>, args: Value) -> JobRequest {
        let (logs, _emitter) = log_channel(
            broker.clone(),
            "log".into(),
            WorkerId::from("w"),
            RuntimeState::new(),
            Duration::from_millis(10),
        );
        JobRequest::new(
            "j1",
            "concept-map",
            args,
            FileStore::new(broker, "files"),
            logs,
        )
    }

    #[derive(Debug, Deserialize)]
    struct Args {
        x: i64,
    }

    #[tokio::test]
    async fn parse_typed_args() {
        let job = request(MemoryBroker::new(), json!({"x": 1}));
        let args: Args = job.parse_args().unwrap();
        assert_eq!(args.x, 1);

        let bad = request(MemoryBroker::new(), json!({"x": "one"}));
        assert!(matches!(
            bad.parse_args::<Args>(),
            Err(PipelineError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn job_file_reads_bytes() {
        let broker = MemoryBroker::new();
        broker.hset_bytes("files", "j1", vec![1, 2, 3]).await;
        let job = request(broker, Value::Null);

        assert_eq!(job.job_file().await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            job.files().get("nope").await,
            Err(PipelineError::FileNotFound(id)) if id == "nope"
        ));
    }

    #[tokio::test]
    async fn closure_pipeline_runs() {
        let pipeline = FnPipeline::new(|job: JobRequest| async move {
            Ok::<_, PipelineError>(json!({"echo": job.args}))
        });
        let out = pipeline
            .run(request(MemoryBroker::new(), json!(5)))
            .await
            .unwrap();
        assert_eq!(out, json!({"echo": 5}));
    }
}
