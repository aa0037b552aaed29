use serde_json::{json, Value};

use tailor_core::errors::ReasoningError;
use tailor_core::ids::ToolCallId;
use tailor_core::messages::{
    AssistantContent, AssistantMessage, Message, StopReason, TokenUsage, ToolCallBlock,
    UserContent,
};
use tailor_core::provider::ConverseOptions;
use tailor_core::tools::ToolDescriptor;

/// Build the messages API request body for one conversation round.
pub fn build_request_body(
    messages: &[Message],
    tools: &[ToolDescriptor],
    options: &ConverseOptions,
    model: &str,
) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": options.max_tokens,
        "messages": convert_messages(messages),
    });

    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }

    if let Some(system) = &options.system {
        body["system"] = json!(system);
    }

    if !tools.is_empty() {
        let tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg {
            Message::User(user) => {
                let blocks: Vec<Value> = user.content.iter().map(convert_user_content).collect();
                json!({"role": "user", "content": blocks})
            }
            Message::Assistant(assistant) => {
                let blocks: Vec<Value> = assistant
                    .content
                    .iter()
                    .map(convert_assistant_content)
                    .collect();
                json!({"role": "assistant", "content": blocks})
            }
        })
        .collect()
}

fn convert_user_content(content: &UserContent) -> Value {
    match content {
        UserContent::Text { text } => json!({"type": "text", "text": text}),
        UserContent::ToolResult {
            tool_call_id,
            text,
            is_error,
        } => {
            let mut block = json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": text,
            });
            if *is_error {
                block["is_error"] = json!(true);
            }
            block
        }
    }
}

fn convert_assistant_content(content: &AssistantContent) -> Value {
    match content {
        AssistantContent::Text { text } => json!({"type": "text", "text": text}),
        AssistantContent::ToolCall(tc) => json!({
            "type": "tool_use",
            "id": tc.id,
            "name": tc.name,
            "input": tc.arguments,
        }),
    }
}

/// Parse a non-streaming messages API response into an assistant message.
pub fn parse_response(body: &Value) -> Result<AssistantMessage, ReasoningError> {
    let blocks = body
        .get("content")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ReasoningError::MalformedResponse("response has no content array".into()))?;

    let mut content = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()) {
            Some("text") => {
                let text = block
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                content.push(AssistantContent::Text { text: text.into() });
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(|v| v.as_str()).ok_or_else(|| {
                    ReasoningError::MalformedResponse("tool_use block missing id".into())
                })?;
                let name = block.get("name").and_then(|v| v.as_str()).ok_or_else(|| {
                    ReasoningError::MalformedResponse("tool_use block missing name".into())
                })?;
                content.push(AssistantContent::ToolCall(ToolCallBlock {
                    id: ToolCallId::from_raw(id),
                    name: name.into(),
                    arguments: block.get("input").cloned().unwrap_or(json!({})),
                }));
            }
            // Unknown block types are skipped rather than rejected.
            _ => {}
        }
    }

    let stop_reason = match body.get("stop_reason").and_then(|v| v.as_str()) {
        Some("end_turn") => Some(StopReason::EndTurn),
        Some("tool_use") => Some(StopReason::ToolUse),
        Some("max_tokens") => Some(StopReason::MaxTokens),
        _ => None,
    };

    let usage = body.get("usage").map(|u| TokenUsage {
        input_tokens: u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        output_tokens: u
            .get("output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
    });

    Ok(AssistantMessage {
        content,
        usage,
        stop_reason,
    })
}
