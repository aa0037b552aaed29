//! Scripted worker doubles shared by the engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use tailor_core::ids::SessionId;
use tailor_core::tools::{ToolDescriptor, ToolOutput};
use tailor_core::worker::{WorkerChannel, WorkerConnector, WorkerError};

pub fn compile_tool() -> ToolDescriptor {
    ToolDescriptor {
        name: "compile_latex".into(),
        description: "Compile LaTeX source to a PDF and return its URL".into(),
        input_schema: serde_json::json!({"type": "object", "required": ["source"]}),
    }
}

pub struct FakeWorker {
    id: SessionId,
    alive: Arc<AtomicBool>,
    tools: Vec<ToolDescriptor>,
    outputs: Mutex<VecDeque<Result<ToolOutput, WorkerError>>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    reconnect_attempts: Arc<AtomicUsize>,
    reconnect_errors: Mutex<VecDeque<WorkerError>>,
    reconnect_gate: Mutex<Option<Arc<tokio::sync::Notify>>>,
}

impl FakeWorker {
    pub fn connected() -> Self {
        Self {
            id: SessionId::new(),
            alive: Arc::new(AtomicBool::new(true)),
            tools: vec![compile_tool()],
            outputs: Mutex::new(VecDeque::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            reconnect_attempts: Arc::new(AtomicUsize::new(0)),
            reconnect_errors: Mutex::new(VecDeque::new()),
            reconnect_gate: Mutex::new(None),
        }
    }

    /// Queue the result of the next `call_tool`. An empty queue answers
    /// `ToolOutput::text("ok")`.
    pub fn with_output(self, output: Result<ToolOutput, WorkerError>) -> Self {
        self.outputs.lock().push_back(output);
        self
    }

    /// Make the next reconnect attempt fail with `err`.
    pub fn failing_reconnect(self, err: WorkerError) -> Self {
        self.reconnect_errors.lock().push_back(err);
        self
    }

    /// Park every reconnect attempt until `gate` is notified.
    pub fn gated_reconnect(self, gate: Arc<tokio::sync::Notify>) -> Self {
        *self.reconnect_gate.lock() = Some(gate);
        self
    }

    /// Flip to false to simulate a dead channel while checked out.
    pub fn alive_handle(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    pub fn reconnect_attempts(&self) -> Arc<AtomicUsize> {
        self.reconnect_attempts.clone()
    }

    /// `(name, arguments)` of every tool call made against this worker.
    pub fn calls(&self) -> Arc<Mutex<Vec<(String, Value)>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl WorkerChannel for FakeWorker {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn connected(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, WorkerError> {
        if !self.connected() {
            return Err(WorkerError::ChannelClosed);
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolOutput, WorkerError> {
        if !self.connected() {
            return Err(WorkerError::ChannelClosed);
        }
        self.calls.lock().push((name.to_string(), arguments));
        match self.outputs.lock().pop_front() {
            Some(result) => result,
            None => Ok(ToolOutput::text("ok")),
        }
    }

    async fn reconnect(&mut self) -> Result<(), WorkerError> {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        let gate = self.reconnect_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.reconnect_errors.lock().pop_front() {
            return Err(err);
        }
        self.alive.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
    }
}

pub struct FakeConnector {
    queue: Mutex<VecDeque<Result<FakeWorker, WorkerError>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_ok(&self, worker: FakeWorker) {
        self.queue.lock().push_back(Ok(worker));
    }

    pub fn push_err(&self, err: WorkerError) {
        self.queue.lock().push_back(Err(err));
    }
}

#[async_trait]
impl WorkerConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn WorkerChannel>, WorkerError> {
        match self.queue.lock().pop_front() {
            Some(Ok(worker)) => Ok(Box::new(worker)),
            Some(Err(err)) => Err(err),
            None => Err(WorkerError::Spawn("no scripted session".into())),
        }
    }
}
