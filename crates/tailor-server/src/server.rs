use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tailor_engine::{DocumentService, EngineError, RateLimiter};
use tailor_telemetry::MetricsRecorder;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8000 }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DocumentService>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Option<Arc<MetricsRecorder>>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/generate", post(generate_handler))
        .route("/health", get(health_handler))
        .route("/health/reconnect", post(reconnect_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Create and start the server. Returns a handle carrying the bound port.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "tailor server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
    })
}

/// Handle returned by `start()` — keeps the serve task alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

#[derive(Deserialize)]
struct GenerateRequest {
    document_content: String,
    target_description: String,
}

/// Rate-limit key: first hop of `X-Forwarded-For`, else the socket address.
fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| addr.ip().to_string())
}

fn error_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        EngineError::PoolExhausted
        | EngineError::WorkerUnavailable(_)
        | EngineError::Bridge(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::Reasoning(_) | EngineError::Worker(_) | EngineError::UnknownTool(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

async fn generate_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> impl IntoResponse {
    let key = client_ip(&headers, addr);
    if !state.limiter.admit(&key) {
        if let Some(m) = &state.metrics {
            m.counter_inc("requests_rate_limited", &[], 1);
        }
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"detail": "Rate limit exceeded. Please try again later."})),
        );
    }

    let service = state.service.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        service.submit_request(&req.document_content, &req.target_description)
    })
    .await;

    match outcome {
        Ok(Ok(result)) => (StatusCode::OK, Json(json!({"result": result}))),
        Ok(Err(e)) => {
            warn!(client = %key, error = %e, "generate request failed");
            (error_status(&e), Json(json!({"detail": e.to_string()})))
        }
        Err(join_err) => {
            warn!(error = %join_err, "generate task panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"detail": "internal error"})),
            )
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.service.pool_status();
    let healthy = status.initialized && status.available > 0;

    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "worker_pool": status,
    });
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

async fn reconnect_handler(State(state): State<AppState>) -> impl IntoResponse {
    let service = state.service.clone();
    let outcome = tokio::task::spawn_blocking(move || service.force_reconnect()).await;

    match outcome {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(json!({"message": "worker pool reconnected successfully"})),
        ),
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": format!("failed to reconnect: {e}")})),
        ),
        Err(join_err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"detail": format!("failed to reconnect: {join_err}")})),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use tailor_core::ids::SessionId;
    use tailor_core::provider::ConverseOptions;
    use tailor_core::tools::{ToolDescriptor, ToolOutput};
    use tailor_core::worker::{WorkerChannel, WorkerConnector, WorkerError};
    use tailor_engine::{ExecutionBridge, Orchestrator, SessionPool};
    use tailor_reasoning::mock::{MockProvider, MockReply};

    struct StubWorker {
        id: SessionId,
        alive: AtomicBool,
        outputs: Mutex<VecDeque<ToolOutput>>,
    }

    impl StubWorker {
        fn new(outputs: Vec<ToolOutput>) -> Self {
            Self {
                id: SessionId::new(),
                alive: AtomicBool::new(true),
                outputs: Mutex::new(outputs.into()),
            }
        }
    }

    #[async_trait]
    impl WorkerChannel for StubWorker {
        fn id(&self) -> &SessionId {
            &self.id
        }

        fn connected(&self) -> bool {
            self.alive.load(Ordering::Relaxed)
        }

        async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, WorkerError> {
            Ok(vec![ToolDescriptor {
                name: "compile_latex".into(),
                description: "Compile LaTeX to PDF".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }])
        }

        async fn call_tool(
            &mut self,
            _name: &str,
            _arguments: serde_json::Value,
        ) -> Result<ToolOutput, WorkerError> {
            Ok(self
                .outputs
                .lock()
                .pop_front()
                .unwrap_or_else(|| ToolOutput::text("ok")))
        }

        async fn reconnect(&mut self) -> Result<(), WorkerError> {
            self.alive.store(true, Ordering::Relaxed);
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.alive.store(false, Ordering::Relaxed);
        }
    }

    struct StubConnector {
        workers: Mutex<VecDeque<StubWorker>>,
    }

    #[async_trait]
    impl WorkerConnector for StubConnector {
        async fn connect(&self) -> Result<Box<dyn WorkerChannel>, WorkerError> {
            self.workers
                .lock()
                .pop_front()
                .map(|w| Box::new(w) as Box<dyn WorkerChannel>)
                .ok_or_else(|| WorkerError::Spawn("no stub worker".into()))
        }
    }

    async fn app_state(
        replies: Vec<MockReply>,
        workers: Vec<StubWorker>,
        limit: usize,
    ) -> AppState {
        let capacity = workers.len();
        let bridge = Arc::new(ExecutionBridge::new());
        let connector = Arc::new(StubConnector {
            workers: Mutex::new(workers.into()),
        });
        let pool = Arc::new(SessionPool::new(capacity, connector, bridge.clone(), None));
        let orchestrator = Orchestrator::new(
            Arc::new(MockProvider::new(replies)),
            bridge.clone(),
            ConverseOptions::default(),
            None,
        );
        let service = Arc::new(DocumentService::new(pool, orchestrator, bridge, None));

        let init = service.clone();
        tokio::task::spawn_blocking(move || init.initialize())
            .await
            .unwrap()
            .unwrap();

        AppState {
            service,
            limiter: Arc::new(RateLimiter::new(Duration::from_secs(60), limit)),
            metrics: None,
        }
    }

    async fn serve(state: AppState) -> u16 {
        let handle = start(ServerConfig { port: 0 }, state).await.unwrap();
        handle.port
    }

    #[tokio::test]
    async fn generate_returns_the_artifact() {
        let state = app_state(
            vec![
                MockReply::tool_call("compile_latex", serde_json::json!({"source": "\\doc"})),
                MockReply::text("Done"),
            ],
            vec![StubWorker::new(vec![ToolOutput::text(
                "{\"url\": \"https://example.com/out.pdf\"}",
            )])],
            10,
        )
        .await;
        let port = serve(state).await;

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/generate"))
            .json(&serde_json::json!({
                "document_content": "EXPERIENCE: ten years",
                "target_description": "senior role"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["result"]["artifact_url"], "https://example.com/out.pdf");
        assert_eq!(body["result"]["iteration_limit_reached"], false);
    }

    #[tokio::test]
    async fn empty_input_is_bad_request() {
        let state = app_state(vec![], vec![StubWorker::new(vec![])], 10).await;
        let port = serve(state).await;

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/generate"))
            .json(&serde_json::json!({
                "document_content": "",
                "target_description": "senior role"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn rate_limit_answers_429() {
        let state = app_state(
            vec![MockReply::text("a"), MockReply::text("b")],
            vec![StubWorker::new(vec![])],
            2,
        )
        .await;
        let port = serve(state).await;
        let client = reqwest::Client::new();
        let body = serde_json::json!({
            "document_content": "doc",
            "target_description": "role"
        });

        for _ in 0..2 {
            let resp = client
                .post(format!("http://127.0.0.1:{port}/api/generate"))
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
        }
        let resp = client
            .post(format!("http://127.0.0.1:{port}/api/generate"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 429);
    }

    #[tokio::test]
    async fn exhausted_pool_is_service_unavailable() {
        let state = app_state(vec![], vec![], 10).await;
        let port = serve(state).await;

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/api/generate"))
            .json(&serde_json::json!({
                "document_content": "doc",
                "target_description": "role"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);
    }

    #[tokio::test]
    async fn health_reflects_pool_state() {
        let state = app_state(vec![], vec![StubWorker::new(vec![])], 10).await;
        let port = serve(state).await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["worker_pool"]["available"], 1);
    }

    #[tokio::test]
    async fn empty_pool_is_unhealthy() {
        let state = app_state(vec![], vec![], 10).await;
        let port = serve(state).await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 503);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "unhealthy");
    }

    #[tokio::test]
    async fn reconnect_replaces_sessions() {
        let state = app_state(
            vec![],
            vec![StubWorker::new(vec![]), StubWorker::new(vec![])],
            10,
        )
        .await;
        let port = serve(state).await;

        let resp = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{port}/health/reconnect"))
            .send()
            .await
            .unwrap();
        // Both stubs were consumed at initialize, so the reset comes back
        // empty but still succeeds.
        assert_eq!(resp.status(), 200);
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(client_ip(&headers, addr), "203.0.113.9");

        let empty = HeaderMap::new();
        assert_eq!(client_ip(&empty, addr), "127.0.0.1");
    }

    #[test]
    fn engine_errors_map_onto_statuses() {
        assert_eq!(
            error_status(&EngineError::InvalidRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&EngineError::PoolExhausted),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_status(&EngineError::UnknownTool("rm".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&EngineError::Reasoning(
                tailor_core::errors::ReasoningError::ProviderOverloaded
            )),
            StatusCode::BAD_GATEWAY
        );
    }
}
