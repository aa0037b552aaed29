use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use tailor_core::errors::ReasoningError;
use tailor_core::ids::ToolCallId;
use tailor_core::messages::{
    AssistantContent, AssistantMessage, Message, StopReason, ToolCallBlock,
};
use tailor_core::provider::{ConverseOptions, ReasoningProvider};
use tailor_core::tools::ToolDescriptor;

/// Pre-programmed response for one `converse` call.
pub enum MockReply {
    Message(AssistantMessage),
    Error(ReasoningError),
}

impl MockReply {
    /// Plain text turn ending the conversation.
    pub fn text(text: &str) -> Self {
        Self::Message(AssistantMessage::text(text))
    }

    /// A turn requesting one tool invocation.
    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self::Message(AssistantMessage {
            content: vec![AssistantContent::ToolCall(ToolCallBlock {
                id: ToolCallId::new(),
                name: name.into(),
                arguments,
            })],
            usage: None,
            stop_reason: Some(StopReason::ToolUse),
        })
    }
}

/// Provider that replays a scripted sequence of replies, for deterministic
/// tests without API calls.
pub struct MockProvider {
    replies: Mutex<VecDeque<MockReply>>,
    call_count: AtomicUsize,
    last_message_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            call_count: AtomicUsize::new(0),
            last_message_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Length of the conversation passed to the most recent call.
    pub fn last_message_count(&self) -> usize {
        self.last_message_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ReasoningProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn converse(
        &self,
        messages: &[Message],
        _tools: &[ToolDescriptor],
        _options: &ConverseOptions,
    ) -> Result<AssistantMessage, ReasoningError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.last_message_count.store(messages.len(), Ordering::Relaxed);

        let reply = self.replies.lock().pop_front().ok_or_else(|| {
            ReasoningError::InvalidRequest(format!("MockProvider: no reply configured for call {idx}"))
        })?;

        match reply {
            MockReply::Message(msg) => Ok(msg),
            MockReply::Error(e) => Err(e),
        }
    }
}
