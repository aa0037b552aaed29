use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, warn};

use tailor_core::ids::RequestId;
use tailor_telemetry::MetricsRecorder;

use crate::bridge::ExecutionBridge;
use crate::error::EngineError;
use crate::orchestrator::{DocumentResult, Orchestrator};
use crate::pool::{PoolStatus, SessionPool};
use crate::prompt;

/// Synchronous facade over the pool and the orchestrator. The HTTP layer
/// calls into it through `spawn_blocking`; every path through
/// `submit_request` returns the acquired session to the pool.
pub struct DocumentService {
    pool: Arc<SessionPool>,
    orchestrator: Orchestrator,
    bridge: Arc<ExecutionBridge>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl DocumentService {
    pub fn new(
        pool: Arc<SessionPool>,
        orchestrator: Orchestrator,
        bridge: Arc<ExecutionBridge>,
        metrics: Option<Arc<MetricsRecorder>>,
    ) -> Self {
        Self {
            pool,
            orchestrator,
            bridge,
            metrics,
        }
    }

    /// Bring the pool up. Partial success is fine; `pool_status` shows what
    /// connected.
    pub fn initialize(&self) -> Result<(), EngineError> {
        self.pool.initialize()
    }

    /// Each request gets a fresh id; every log record it emits carries it,
    /// which is what the telemetry sink's `request_id` column keys on.
    pub fn submit_request(
        &self,
        document_content: &str,
        target_description: &str,
    ) -> Result<DocumentResult, EngineError> {
        let request_id = RequestId::new();
        let span = info_span!("submit_request", request_id = %request_id);
        let _guard = span.enter();

        if document_content.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "document_content must not be empty".into(),
            ));
        }
        if target_description.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "target_description must not be empty".into(),
            ));
        }

        self.count("requests_total");
        let started = Instant::now();

        let session = match self.pool.acquire() {
            Some(s) => s,
            None => {
                self.count("pool_exhausted_total");
                warn!(request_id = %request_id, "request rejected, pool exhausted");
                return Err(EngineError::PoolExhausted);
            }
        };
        let session_id = session.id().clone();

        let instruction = prompt::build_instruction(document_content, target_description);
        let outcome = self.orchestrator.run(session, instruction);

        match outcome.session {
            Some(s) => self.pool.release(s),
            None => self.pool.forget(&session_id),
        }

        if let Some(m) = &self.metrics {
            m.histogram_observe(
                "request_duration_ms",
                &[],
                started.elapsed().as_millis() as f64,
            );
        }

        match &outcome.result {
            Ok(result) => info!(
                request_id = %request_id,
                iterations = result.iterations,
                artifact = result.artifact_url.is_some(),
                "request fulfilled"
            ),
            Err(e) => warn!(request_id = %request_id, error = %e, "request failed"),
        }
        outcome.result
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Reset every worker session. For operators; requests in flight keep
    /// their sessions until release.
    pub fn force_reconnect(&self) -> Result<(), EngineError> {
        self.pool.force_reset()
    }

    /// Shut the pool down, then the bridge. Idempotent.
    pub fn shutdown(&self) {
        info!("document service shutting down");
        self.pool.shutdown();
        self.bridge.shutdown();
    }

    fn count(&self, name: &'static str) {
        if let Some(m) = &self.metrics {
            m.counter_inc(name, &[], 1);
        }
    }
}
