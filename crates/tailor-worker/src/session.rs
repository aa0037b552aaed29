use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, instrument, warn};

use tailor_core::ids::SessionId;
use tailor_core::tools::{ToolDescriptor, ToolOutput};
use tailor_core::worker::{WorkerChannel, WorkerConnector, WorkerError};

use crate::rpc::{JsonRpcRequest, JsonRpcResponse};

const PROTOCOL_VERSION: &str = "2024-11-05";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How to spawn the worker process. The command is executed directly, with
/// no shell interpretation of arguments.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub request_timeout: Duration,
}

impl WorkerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// The live stdio channel to one worker process.
#[derive(Debug)]
struct StdioChannel {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// One persistent connection to a worker process. Exclusively owned: the
/// pool hands it to at most one request at a time.
#[derive(Debug)]
pub struct WorkerSession {
    id: SessionId,
    config: WorkerConfig,
    channel: Option<StdioChannel>,
    connected: bool,
    next_request_id: u64,
}

impl WorkerSession {
    /// Spawn the worker and perform the initialize handshake.
    #[instrument(skip(config), fields(command = %config.command))]
    pub async fn connect(config: WorkerConfig) -> Result<Self, WorkerError> {
        let mut session = Self {
            id: SessionId::new(),
            config,
            channel: None,
            connected: false,
            next_request_id: 1,
        };
        session.establish().await?;
        Ok(session)
    }

    async fn establish(&mut self) -> Result<(), WorkerError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| WorkerError::Spawn(format!("{}: {e}", self.config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Spawn("failed to capture worker stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Spawn("failed to capture worker stdout".into()))?;

        self.channel = Some(StdioChannel {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        });

        self.handshake().await?;
        self.connected = true;
        debug!(session_id = %self.id, "worker session connected");
        Ok(())
    }

    /// Initialize handshake: `initialize` request, then the
    /// `notifications/initialized` notification (no response expected).
    async fn handshake(&mut self) -> Result<(), WorkerError> {
        let response = self
            .request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "tailor",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;

        if response.get("protocolVersion").is_none() {
            return Err(WorkerError::Protocol(
                "initialize response missing protocolVersion".into(),
            ));
        }

        let notification =
            serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized", "params": {}});
        self.write_line(&notification.to_string()).await
    }

    /// Issue one request and wait for its response, with the configured
    /// timeout. Any transport failure marks the session disconnected.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, WorkerError> {
        let id = self.next_request_id;
        self.next_request_id += 1;
        let req = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&req)
            .map_err(|e| WorkerError::Protocol(format!("failed to serialize request: {e}")))?;

        self.write_line(&line).await?;

        let timeout = self.config.request_timeout;
        let response = match tokio::time::timeout(timeout, self.read_response()).await {
            Ok(res) => res?,
            Err(_) => {
                self.connected = false;
                return Err(WorkerError::Timeout(timeout));
            }
        };

        if let Some(error) = response.error {
            return Err(WorkerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| WorkerError::Protocol(format!("{method}: response has no result")))
    }

    async fn write_line(&mut self, line: &str) -> Result<(), WorkerError> {
        let channel = self.channel.as_mut().ok_or(WorkerError::ChannelClosed)?;
        let write = async {
            channel.stdin.write_all(line.as_bytes()).await?;
            channel.stdin.write_all(b"\n").await?;
            channel.stdin.flush().await
        };
        if let Err(e) = write.await {
            self.connected = false;
            return Err(WorkerError::Io(e.to_string()));
        }
        Ok(())
    }

    /// Read lines until one parses as a JSON-RPC response, skipping blank
    /// lines and stray worker log output.
    async fn read_response(&mut self) -> Result<JsonRpcResponse, WorkerError> {
        let result = {
            let channel = self.channel.as_mut().ok_or(WorkerError::ChannelClosed)?;
            let mut line = String::new();
            loop {
                line.clear();
                match channel.stdout.read_line(&mut line).await {
                    Err(e) => break Err(WorkerError::Io(e.to_string())),
                    Ok(0) => break Err(WorkerError::ChannelClosed),
                    Ok(_) => {}
                }
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(trimmed) {
                    break Ok(response);
                }
            }
        };
        if result.is_err() {
            self.connected = false;
        }
        result
    }

    async fn teardown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.child.kill().await {
                warn!(session_id = %self.id, error = %e, "failed to kill worker process");
            }
        }
        self.connected = false;
    }
}

#[async_trait]
impl WorkerChannel for WorkerSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn connected(&self) -> bool {
        self.connected
    }

    #[instrument(skip(self), fields(session_id = %self.id))]
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, WorkerError> {
        let result = self.request("tools/list", None).await?;
        let tools = result
            .get("tools")
            .and_then(|v| v.as_array())
            .ok_or_else(|| WorkerError::Protocol("tools/list result has no tools array".into()))?;

        Ok(tools
            .iter()
            .map(|tool| ToolDescriptor {
                name: tool
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                description: tool
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                input_schema: tool
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
            })
            .collect())
    }

    #[instrument(skip(self, arguments), fields(session_id = %self.id, tool = name))]
    async fn call_tool(
        &mut self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolOutput, WorkerError> {
        let params = serde_json::json!({"name": name, "arguments": arguments});
        let result = self.request("tools/call", Some(params)).await?;

        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        // First text block wins; a result with no content blocks falls back
        // to the raw JSON, matching the worker contract's loose edge.
        let content = result
            .get("content")
            .and_then(|v| v.as_array())
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find_map(|b| b.get("text").and_then(|t| t.as_str()))
            })
            .map(String::from)
            .unwrap_or_else(|| result.to_string());

        Ok(ToolOutput { content, is_error })
    }

    #[instrument(skip(self), fields(session_id = %self.id))]
    async fn reconnect(&mut self) -> Result<(), WorkerError> {
        self.teardown().await;
        self.next_request_id = 1;
        self.establish().await
    }

    async fn disconnect(&mut self) {
        self.teardown().await;
        debug!(session_id = %self.id, "worker session disconnected");
    }
}

/// Connects new worker sessions for the pool.
pub struct StdioConnector {
    config: WorkerConfig,
}

impl StdioConnector {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkerConnector for StdioConnector {
    async fn connect(&self) -> Result<Box<dyn WorkerChannel>, WorkerError> {
        let session = WorkerSession::connect(self.config.clone()).await?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    /// Scripted worker: answers the handshake, a tools/list, and one
    /// tools/call, in that order.
    const FAKE_WORKER: &str = r#"#!/bin/sh
read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake-worker"}}}'
read line
read line
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"compile_latex","description":"Compile LaTeX to PDF","inputSchema":{"type":"object","required":["source"]}}]}}'
read line
echo 'worker: compiling'
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"{\"url\": \"https://example.com/doc.pdf\"}"}]}}'
"#;

    fn write_script(body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tailor-worker-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("worker.sh");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        let mut perms = f.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn config_for(script: &PathBuf) -> WorkerConfig {
        WorkerConfig::new("/bin/sh", vec![script.to_string_lossy().into_owned()])
            .with_request_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn connect_performs_handshake() {
        let script = write_script(FAKE_WORKER);
        let session = WorkerSession::connect(config_for(&script)).await.unwrap();
        assert!(session.connected());
        assert!(session.id().as_str().starts_with("sess_"));
    }

    #[tokio::test]
    async fn list_tools_returns_catalog() {
        let script = write_script(FAKE_WORKER);
        let mut session = WorkerSession::connect(config_for(&script)).await.unwrap();

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "compile_latex");
        assert_eq!(tools[0].input_schema["required"][0], "source");
    }

    #[tokio::test]
    async fn call_tool_skips_log_lines_and_extracts_text() {
        let script = write_script(FAKE_WORKER);
        let mut session = WorkerSession::connect(config_for(&script)).await.unwrap();
        session.list_tools().await.unwrap();

        let out = session
            .call_tool("compile_latex", serde_json::json!({"source": "x"}))
            .await
            .unwrap();
        assert!(!out.is_error);
        assert!(out.content.contains("https://example.com/doc.pdf"));
    }

    #[tokio::test]
    async fn spawn_failure_is_typed() {
        let config = WorkerConfig::new("/nonexistent/worker-binary", vec![]);
        let err = WorkerSession::connect(config).await.unwrap_err();
        assert!(matches!(err, WorkerError::Spawn(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn worker_exit_marks_disconnected() {
        // Script exits after the handshake, so the next request hits EOF.
        let script = write_script(
            r#"#!/bin/sh
read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}'
read line
"#,
        );
        let mut session = WorkerSession::connect(config_for(&script)).await.unwrap();
        assert!(session.connected());

        let err = session.list_tools().await.unwrap_err();
        assert!(matches!(err, WorkerError::ChannelClosed), "got: {err:?}");
        assert!(!session.connected());
    }

    #[tokio::test]
    async fn reconnect_restores_channel() {
        let script = write_script(FAKE_WORKER);
        let mut session = WorkerSession::connect(config_for(&script)).await.unwrap();
        session.disconnect().await;
        assert!(!session.connected());

        session.reconnect().await.unwrap();
        assert!(session.connected());
        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
    }

    #[tokio::test]
    async fn rpc_error_is_surfaced() {
        let script = write_script(
            r#"#!/bin/sh
read line
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}'
read line
read line
echo '{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"method not found","data":null}}'
"#,
        );
        let mut session = WorkerSession::connect(config_for(&script)).await.unwrap();
        let err = session.list_tools().await.unwrap_err();
        match err {
            WorkerError::Rpc { code, .. } => assert_eq!(code, -32601),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
