//! Job worker — pulls jobs from Redis queues and runs them through pipelines.

pub mod broker;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod worker;

pub use config::{KeySpace, WorkerConfig};
pub use error::{Error, Result};
pub use pipeline::{JobRequest, Pipeline, PipelineRegistry};
pub use worker::{JobOutcome, Worker};
