//! Reasoning-service backends: the Anthropic messages client used in
//! production, and a scripted mock for tests.

mod anthropic;
mod convert;
pub mod mock;

pub use anthropic::AnthropicProvider;
