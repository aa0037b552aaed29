//! The core of the backend: the worker-session pool, the sync-to-async
//! execution bridge, the bounded tool-use conversation loop, and the facade
//! the HTTP layer talks to.

pub mod bridge;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod prompt;
pub mod ratelimit;
pub mod service;

#[cfg(test)]
mod support;

pub use bridge::{BridgeError, ExecutionBridge};
pub use error::EngineError;
pub use orchestrator::{DocumentResult, Orchestrator, MAX_ITERATIONS};
pub use pool::{PoolStatus, SessionPool, DEFAULT_CAPACITY};
pub use ratelimit::RateLimiter;
pub use service::DocumentService;
