//! HTTP surface over the document-generation engine.

pub mod server;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
