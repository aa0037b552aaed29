use tailor_core::errors::ReasoningError;
use tailor_core::worker::WorkerError;

use crate::bridge::BridgeError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no worker session available")]
    PoolExhausted,

    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("reasoning error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("worker error: {0}")]
    Worker(WorkerError),

    #[error("unknown tool requested: {0}")]
    UnknownTool(String),

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl From<WorkerError> for EngineError {
    /// Transport-level failures mean the worker is gone; protocol-level
    /// failures mean the worker answered badly. The HTTP layer maps the two
    /// onto different statuses.
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Spawn(_)
            | WorkerError::ChannelClosed
            | WorkerError::Io(_)
            | WorkerError::Timeout(_) => Self::WorkerUnavailable(err.to_string()),
            WorkerError::Protocol(_) | WorkerError::Rpc { .. } => Self::Worker(err),
        }
    }
}
