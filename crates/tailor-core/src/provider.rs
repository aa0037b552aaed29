use async_trait::async_trait;

use crate::errors::ReasoningError;
use crate::messages::{AssistantMessage, Message};
use crate::tools::ToolDescriptor;

/// Options controlling a single reasoning round.
#[derive(Clone, Debug)]
pub struct ConverseOptions {
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub system: Option<String>,
}

impl Default for ConverseOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: None,
            system: None,
        }
    }
}

/// Trait implemented by each reasoning-service backend.
///
/// One `converse` call is one round: the full conversation so far plus the
/// worker's tool catalog go in, one assistant message (possibly containing
/// tool invocation requests) comes out.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn converse(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &ConverseOptions,
    ) -> Result<AssistantMessage, ReasoningError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converse_options_defaults() {
        let opts = ConverseOptions::default();
        assert_eq!(opts.max_tokens, 1000);
        assert!(opts.temperature.is_none());
        assert!(opts.system.is_none());
    }
}
