//! Worker sessions: persistent stdio JSON-RPC connections to the
//! document-compilation worker process.

mod rpc;
mod session;

pub use session::{StdioConnector, WorkerConfig, WorkerSession};
