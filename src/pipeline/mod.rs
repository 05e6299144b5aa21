pub mod manifest;
pub mod orchestrator;

pub use manifest::RunManifest;
pub use orchestrator::{Pipeline, PipelineSettings, ProviderFactory, RunError, RunOptions};
