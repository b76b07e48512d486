//! Top-level error types for engine assembly and bundle files.

use thiserror::Error;

/// Assembly failures from [`EngineBuilder`](crate::engine::EngineBuilder).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no page bridge was provided")]
    MissingBridge,

    #[error("no flow store was provided")]
    MissingStore,
}

/// Failures while reading a workflow bundle from disk.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to read bundle: {0}")]
    Io(#[from] std::io::Error),

    #[error("bundle is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bundle is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
