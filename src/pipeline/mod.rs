//! Pipelines — the pluggable functions jobs are handed to.

pub mod builtin;
pub mod handler;
pub mod registry;

pub use builtin::EchoPipeline;
pub use handler::{FileStore, FnPipeline, JobRequest, Pipeline};
pub use registry::PipelineRegistry;
