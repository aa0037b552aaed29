use std::sync::Arc;

use clap::Parser;

use tailor_core::provider::ConverseOptions;
use tailor_core::security::ApiKey;
use tailor_engine::{
    DocumentService, ExecutionBridge, Orchestrator, RateLimiter, SessionPool, DEFAULT_CAPACITY,
};
use tailor_reasoning::AnthropicProvider;
use tailor_server::{AppState, ServerConfig};
use tailor_telemetry::{init_telemetry, TelemetryConfig};
use tailor_worker::{StdioConnector, WorkerConfig};

#[derive(Parser)]
#[command(name = "tailor", about = "Document-generation backend", version)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Worker executable spawned for each pooled session.
    #[arg(long)]
    worker: String,

    /// Arguments passed to the worker executable. Repeatable.
    #[arg(long = "worker-arg")]
    worker_args: Vec<String>,

    /// Number of pooled worker sessions.
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,

    /// Reasoning model name. Defaults to the provider's current model.
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let telemetry = init_telemetry(TelemetryConfig::default());
    let metrics = telemetry.metrics();

    tracing::info!("starting tailor backend");

    let api_key = match ApiKey::from_env(&["TAILOR_API_KEY", "ANTHROPIC_API_KEY"]) {
        Some(key) => key,
        None => {
            eprintln!("set TAILOR_API_KEY or ANTHROPIC_API_KEY");
            std::process::exit(1);
        }
    };

    let bridge = Arc::new(ExecutionBridge::new());
    let connector = Arc::new(StdioConnector::new(WorkerConfig::new(
        cli.worker,
        cli.worker_args,
    )));
    let pool = Arc::new(SessionPool::new(
        cli.capacity,
        connector,
        bridge.clone(),
        metrics.clone(),
    ));
    let provider = Arc::new(AnthropicProvider::new(api_key, cli.model.as_deref()));
    let orchestrator = Orchestrator::new(
        provider,
        bridge.clone(),
        ConverseOptions::default(),
        metrics.clone(),
    );
    let service = Arc::new(DocumentService::new(
        pool,
        orchestrator,
        bridge,
        metrics.clone(),
    ));

    // The bridge blocks its caller, so initialization (and every later
    // service call) runs off the async runtime.
    let init = service.clone();
    tokio::task::spawn_blocking(move || init.initialize())
        .await
        .expect("pool initialization panicked")
        .expect("failed to initialize worker pool");

    let status = service.pool_status();
    tracing::info!(
        available = status.available,
        capacity = status.capacity,
        "worker pool initialized"
    );

    let state = AppState {
        service: service.clone(),
        limiter: Arc::new(RateLimiter::default()),
        metrics: metrics.clone(),
    };
    let handle = tailor_server::start(ServerConfig { port: cli.port }, state)
        .await
        .expect("failed to start server");
    tracing::info!(port = handle.port, "tailor server ready");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");

    tracing::info!("shutting down");
    let stopping = service.clone();
    tokio::task::spawn_blocking(move || stopping.shutdown())
        .await
        .ok();
    if let Some(m) = metrics {
        if let Err(e) = m.snapshot() {
            tracing::warn!(error = %e, "failed to persist metrics snapshot");
        }
    }
}
