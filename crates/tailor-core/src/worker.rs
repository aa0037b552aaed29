use std::time::Duration;

use async_trait::async_trait;

use crate::ids::SessionId;
use crate::tools::{ToolDescriptor, ToolOutput};

/// Errors raised by a worker session.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
    #[error("worker channel closed")]
    ChannelClosed,
    #[error("worker io error: {0}")]
    Io(String),
    #[error("worker protocol error: {0}")]
    Protocol(String),
    #[error("worker rpc error [{code}]: {message}")]
    Rpc { code: i64, message: String },
    #[error("worker timeout after {0:?}")]
    Timeout(Duration),
}

/// A persistent connection to one worker process exposing a fixed tool
/// catalog over a request/response protocol. Never shared between two
/// concurrent callers; ownership moves between the pool and the request
/// holding it.
#[async_trait]
pub trait WorkerChannel: Send {
    fn id(&self) -> &SessionId;

    /// False once the underlying process or channel has failed.
    fn connected(&self) -> bool;

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, WorkerError>;

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, WorkerError>;

    /// Tear down and re-establish the underlying channel.
    async fn reconnect(&mut self) -> Result<(), WorkerError>;

    async fn disconnect(&mut self);
}

/// Factory for worker channels, used by the pool at initialization and
/// during a forced reset.
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn WorkerChannel>, WorkerError>;
}
