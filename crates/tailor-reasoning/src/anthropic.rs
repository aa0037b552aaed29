use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use tracing::instrument;

use tailor_core::errors::ReasoningError;
use tailor_core::messages::{AssistantMessage, Message};
use tailor_core::provider::{ConverseOptions, ReasoningProvider};
use tailor_core::security::ApiKey;
use tailor_core::tools::ToolDescriptor;

use crate::convert;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Non-streaming Anthropic messages client. One `converse` call is one
/// complete request/response round.
pub struct AnthropicProvider {
    client: Client,
    api_key: ApiKey,
    model: String,
    api_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: ApiKey, model: Option<&str>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            api_url: API_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

#[async_trait]
impl ReasoningProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, messages, tools, options), fields(model = %self.model, messages = messages.len()))]
    async fn converse(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        options: &ConverseOptions,
    ) -> Result<AssistantMessage, ReasoningError> {
        let body = convert::build_request_body(messages, tools, options, &self.model);

        let resp = self
            .client
            .post(&self.api_url)
            .header("x-api-key", self.api_key.0.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReasoningError::Timeout(REQUEST_TIMEOUT)
                } else {
                    ReasoningError::NetworkError(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ReasoningError::from_status(status, body));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ReasoningError::MalformedResponse(e.to_string()))?;

        convert::parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_properties() {
        let provider = AnthropicProvider::new(ApiKey::new("test-key"), Some("claude-opus-4-6"));
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), "claude-opus-4-6");
    }

    #[test]
    fn default_model_used_when_none() {
        let provider = AnthropicProvider::new(ApiKey::new("test-key"), None);
        assert_eq!(provider.model(), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let provider = AnthropicProvider::new(ApiKey::new("test-key"), None)
            .with_api_url("http://127.0.0.1:1/v1/messages");
        let err = provider
            .converse(
                &[Message::user_text("hi")],
                &[],
                &ConverseOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, ReasoningError::NetworkError(_)),
            "got: {err:?}"
        );
    }
}
