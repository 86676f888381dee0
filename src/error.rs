//! Error taxonomy for the route-calculation pipeline.

use thiserror::Error;

use crate::graph::NodeId;
use crate::jobs::JobId;

/// Failure reported by an external collaborator (trail provider, POI store).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed provider response: {0}")]
    Decode(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Failure of the trail data cache.
///
/// Cloneable so every caller waiting on a shared fetch receives the same error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("trail data unavailable: {message}")]
    DataUnavailable { message: String },
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("no routable trail data in area")]
    EmptyGraph,
    #[error("node {0} is not in the graph")]
    UnknownNode(NodeId),
}

/// Failure of one pipeline stage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),
    #[error("no routable trail data in area")]
    EmptyGraph,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CacheError> for PipelineError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::DataUnavailable { message } => PipelineError::DataUnavailable(message),
        }
    }
}

impl From<GraphError> for PipelineError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::EmptyGraph => PipelineError::EmptyGraph,
            GraphError::UnknownNode(_) => PipelineError::Internal(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to start job recorder: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to build trail provider: {0}")]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}
