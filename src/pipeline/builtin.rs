//! Built-in pipelines.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PipelineError;
use crate::pipeline::handler::{JobRequest, Pipeline};

/// Returns the job arguments unchanged. Handy for smoke-testing a deployment.
#[derive(Debug, Default)]
pub struct EchoPipeline;

#[async_trait]
impl Pipeline for EchoPipeline {
    async fn run(&self, job: JobRequest) -> Result<Value, PipelineError> {
        job.log(format!("Echoing {} job {}", job.pipeline, job.job_id));
        Ok(job.args)
    }
}
