//! Pipeline registry — pipeline name to handler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::PipelineError;
use crate::pipeline::handler::{FnPipeline, JobRequest, Pipeline};

/// Registry of job handlers, filled once at startup.
pub struct PipelineRegistry {
    pipelines: RwLock<HashMap<String, Arc<dyn Pipeline>>>,
}

impl PipelineRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler. A second registration under the same name replaces
    /// the first.
    pub async fn register(&self, name: impl Into<String>, pipeline: Arc<dyn Pipeline>) {
        let name = name.into();
        if self
            .pipelines
            .write()
            .await
            .insert(name.clone(), pipeline)
            .is_some()
        {
            tracing::warn!(pipeline = %name, "Replaced existing pipeline handler");
        } else {
            tracing::debug!("Registered pipeline: {}", name);
        }
    }

    /// Register an async closure as a handler.
    pub async fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(JobRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, PipelineError>> + Send + 'static,
    {
        self.register(name, Arc::new(FnPipeline::new(f))).await;
    }

    /// Get a handler by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Pipeline>> {
        self.pipelines.read().await.get(name).cloned()
    }

    /// Check if a pipeline exists.
    pub async fn has(&self, name: &str) -> bool {
        self.pipelines.read().await.contains_key(name)
    }

    /// Registered names, sorted. This order is the pop priority.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered pipelines.
    pub fn count(&self) -> usize {
        self.pipelines.try_read().map(|p| p.len()).unwrap_or(0)
    }

    /// Run the handler registered for `job.pipeline`.
    pub async fn dispatch(&self, job: JobRequest) -> Result<Value, PipelineError> {
        let pipeline = self
            .get(&job.pipeline)
            .await
            .ok_or_else(|| PipelineError::NotRegistered(job.pipeline.clone()))?;
        pipeline.run(job).await
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::pipeline::handler::FileStore;
    use crate::worker::identity::WorkerId;
    use crate::worker::log::log_channel;
    use crate::worker::state::RuntimeState;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct Constant(Value);

    #[async_trait]
    impl Pipeline for Constant {
        async fn run(&self, _job: JobRequest) -> Result<Value, PipelineError> {
            Ok(self.0.clone())
        }
    }

    fn request(pipeline: &str) -> JobRequest {
        let broker = MemoryBroker::new();
        let (logs, _emitter) = log_channel(
            broker.clone(),
            "log".into(),
            WorkerId::from("w"),
            RuntimeState::new(),
            Duration::from_millis(10),
        );
        JobRequest::new("j1", pipeline, Value::Null, FileStore::new(broker, "files"), logs)
    }

    #[tokio::test]
    async fn register_and_dispatch() {
        let registry = PipelineRegistry::new();
        registry
            .register("concept-map", Arc::new(Constant(json!({"y": 2}))))
            .await;

        assert!(registry.has("concept-map").await);
        assert!(!registry.has("other").await);
        let out = registry.dispatch(request("concept-map")).await.unwrap();
        assert_eq!(out, json!({"y": 2}));
    }

    #[tokio::test]
    async fn names_are_sorted() {
        let registry = PipelineRegistry::new();
        registry.register("b", Arc::new(Constant(Value::Null))).await;
        registry.register("a", Arc::new(Constant(Value::Null))).await;
        assert_eq!(registry.names().await, vec!["a", "b"]);
        assert_eq!(registry.count(), 2);
    }

    #[tokio::test]
    async fn reregistering_replaces_handler() {
        let registry = PipelineRegistry::new();
        registry.register("a", Arc::new(Constant(json!(1)))).await;
        registry.register_fn("a", |_job| async { Ok::<_, PipelineError>(json!(2)) }).await;

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.dispatch(request("a")).await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn unknown_pipeline_is_an_error() {
        let registry = PipelineRegistry::new();
        assert!(matches!(
            registry.dispatch(request("missing")).await,
            Err(PipelineError::NotRegistered(name)) if name == "missing"
        ));
    }
}
