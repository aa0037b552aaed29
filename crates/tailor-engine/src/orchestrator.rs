use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, instrument};

use tailor_core::messages::{Message, ToolCallBlock, UserContent};
use tailor_core::provider::{ConverseOptions, ReasoningProvider};
use tailor_core::worker::WorkerChannel;
use tailor_telemetry::MetricsRecorder;

use crate::bridge::ExecutionBridge;
use crate::error::EngineError;

pub const MAX_ITERATIONS: u32 = 10;

/// Outcome of one fulfilled generation request.
#[derive(Clone, Debug, Serialize)]
pub struct DocumentResult {
    pub artifact_url: Option<String>,
    pub assistant_text: String,
    pub iterations: u32,
    pub iteration_limit_reached: bool,
}

/// What `run` hands back: the session (so the pool can always reclaim it)
/// and the request outcome. `session: None` means the bridge lost the task
/// mid-flight and the session with it.
pub struct RunOutcome {
    pub session: Option<Box<dyn WorkerChannel>>,
    pub result: Result<DocumentResult, EngineError>,
}

impl RunOutcome {
    fn done(session: Box<dyn WorkerChannel>, result: DocumentResult) -> Self {
        Self {
            session: Some(session),
            result: Ok(result),
        }
    }

    fn failed(session: Box<dyn WorkerChannel>, err: EngineError) -> Self {
        Self {
            session: Some(session),
            result: Err(err),
        }
    }

    fn lost(err: EngineError) -> Self {
        Self {
            session: None,
            result: Err(err),
        }
    }
}

/// Drives the bounded tool-use conversation for one request.
///
/// The caller holds the worker session for the whole conversation; its
/// ownership round-trips through the bridge for each async operation. Tool
/// calls within a round run sequentially against that one session.
pub struct Orchestrator {
    provider: Arc<dyn ReasoningProvider>,
    bridge: Arc<ExecutionBridge>,
    options: ConverseOptions,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn ReasoningProvider>,
        bridge: Arc<ExecutionBridge>,
        options: ConverseOptions,
        metrics: Option<Arc<MetricsRecorder>>,
    ) -> Self {
        Self {
            provider,
            bridge,
            options,
            metrics,
        }
    }

    #[instrument(skip(self, session, instruction), fields(session_id = %session.id()))]
    pub fn run(&self, mut session: Box<dyn WorkerChannel>, instruction: String) -> RunOutcome {
        let tools = match self.bridge.run_blocking(async move {
            let mut s = session;
            let r = s.list_tools().await;
            (s, r)
        }) {
            Ok((s, Ok(tools))) => {
                session = s;
                tools
            }
            Ok((s, Err(e))) => return RunOutcome::failed(s, e.into()),
            Err(e) => return RunOutcome::lost(e.into()),
        };

        let mut messages = vec![Message::user_text(instruction)];
        let mut artifact_url: Option<String> = None;
        let mut iterations = 0u32;
        let mut last_text = String::new();

        while iterations < MAX_ITERATIONS {
            iterations += 1;

            let provider = self.provider.clone();
            let round_messages = messages.clone();
            let round_tools = tools.clone();
            let options = self.options.clone();
            let assistant = match self.bridge.run_blocking(async move {
                provider
                    .converse(&round_messages, &round_tools, &options)
                    .await
            }) {
                Ok(Ok(m)) => m,
                Ok(Err(e)) => return RunOutcome::failed(session, e.into()),
                Err(e) => return RunOutcome::failed(session, e.into()),
            };

            last_text = assistant.text_content();
            let calls: Vec<ToolCallBlock> =
                assistant.tool_calls().into_iter().cloned().collect();
            messages.push(Message::Assistant(assistant));

            if calls.is_empty() {
                debug!(iterations, artifact = ?artifact_url, "conversation complete");
                return RunOutcome::done(
                    session,
                    DocumentResult {
                        artifact_url,
                        assistant_text: last_text,
                        iterations,
                        iteration_limit_reached: false,
                    },
                );
            }

            // A request for a tool the worker never advertised is a protocol
            // violation, not something to skip over.
            if let Some(call) = calls.iter().find(|c| !tools.iter().any(|t| t.name == c.name)) {
                return RunOutcome::failed(session, EngineError::UnknownTool(call.name.clone()));
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                let tool_name = call.name.clone();
                let args = call.arguments.clone();
                let started = Instant::now();

                let outcome = self.bridge.run_blocking(async move {
                    let mut s = session;
                    let r = s.call_tool(&tool_name, args).await;
                    (s, r)
                });
                let (returned, result) = match outcome {
                    Ok(pair) => pair,
                    Err(e) => return RunOutcome::lost(e.into()),
                };
                session = returned;

                if let Some(m) = &self.metrics {
                    m.histogram_observe(
                        "tool_call_duration_ms",
                        &[("tool", &call.name)],
                        started.elapsed().as_millis() as f64,
                    );
                }

                let output = match result {
                    Ok(o) => o,
                    Err(e) => return RunOutcome::failed(session, e.into()),
                };

                // A result carrying a url field updates the tentative
                // artifact reference; the last one processed wins.
                if output.content.contains("url") {
                    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&output.content) {
                        if let Some(url) = value.get("url").and_then(|v| v.as_str()) {
                            artifact_url = Some(url.to_string());
                        }
                    }
                }

                results.push(UserContent::ToolResult {
                    tool_call_id: call.id.clone(),
                    text: output.content,
                    is_error: output.is_error,
                });
            }
            messages.push(Message::tool_results(results));
        }

        debug!(iterations, artifact = ?artifact_url, "iteration limit reached");
        RunOutcome::done(
            session,
            DocumentResult {
                artifact_url,
                assistant_text: last_text,
                iterations,
                iteration_limit_reached: true,
            },
        )
    }
}
