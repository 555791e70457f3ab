use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_TYPE, ORIGIN};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use playground::run::default_playpen_args;
use playground::{
    ArgumentBuilder, CacheStats, Playground, PlaygroundResponse, ProcessAdapter, RunConfig,
    ToolPaths, DEFAULT_CAPACITY,
};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{dispatcher, error, info};
use tracing_subscriber::prelude::*;

const DEFAULT_SYSTEM_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

struct AppMetrics {
    registry: Registry,
    requests: IntCounterVec,
    cache_hits: IntGauge,
    cache_misses: IntGauge,
    cache_entries: IntGauge,
}

impl AppMetrics {
    fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new(
                "playground_requests_total",
                "Requests handled by endpoint and outcome",
            ),
            &["endpoint", "outcome"],
        )?;
        let cache_hits = IntGauge::new(
            "playground_cache_hits",
            "Executions answered from the dispatch cache",
        )?;
        let cache_misses = IntGauge::new(
            "playground_cache_misses",
            "Executions that reached the sandbox",
        )?;
        let cache_entries = IntGauge::new(
            "playground_cache_entries",
            "Signatures currently held by the dispatch cache",
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;
        Ok(Self {
            registry,
            requests,
            cache_hits,
            cache_misses,
            cache_entries,
        })
    }

    fn record_request(&self, endpoint: Endpoint, outcome: &str) {
        self.requests
            .with_label_values(&[endpoint.as_str(), outcome])
            .inc();
    }

    fn render(&self, stats: CacheStats) -> anyhow::Result<String> {
        self.cache_hits.set(stats.hits as i64);
        self.cache_misses.set(stats.misses as i64);
        self.cache_entries.set(stats.entries as i64);
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Clone)]
struct AppState {
    playground: Arc<Playground>,
    metrics: Arc<AppMetrics>,
}

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Evaluate,
    Format,
    Compile,
}

impl Endpoint {
    fn as_str(self) -> &'static str {
        match self {
            Endpoint::Evaluate => "evaluate",
            Endpoint::Format => "format",
            Endpoint::Compile => "compile",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let metrics = Arc::new(AppMetrics::new()?);
    let bind_addr = resolve_bind_address()?;
    let playground = Arc::new(initialize_playground()?);

    let app = router(AppState {
        playground,
        metrics,
    });

    info!(%bind_addr, "server starting");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/evaluate.json", post(evaluate))
        .route("/format.json", post(format))
        .route("/compile.json", post(compile))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors()),
        )
}

/// Answers every `OPTIONS` request itself, so preflights never reach a
/// handler.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([ORIGIN, ACCEPT, CONTENT_TYPE])
}

fn init_tracing() -> anyhow::Result<()> {
    if dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().json();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

fn resolve_bind_address() -> anyhow::Result<SocketAddr> {
    let raw =
        std::env::var("PLAYGROUND_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    Ok(raw.parse()?)
}

fn initialize_playground() -> anyhow::Result<Playground> {
    let launcher = std::env::var("PLAYGROUND_LAUNCHER")
        .unwrap_or_else(|_| "playpen".to_string())
        .trim()
        .to_string();
    let launcher = Some(launcher).filter(|l| !l.is_empty() && l != "none");
    let launcher_args = match std::env::var("PLAYGROUND_LAUNCHER_ARGS") {
        Ok(raw) => raw.split_whitespace().map(str::to_string).collect(),
        Err(_) if launcher.is_some() => default_playpen_args(),
        Err(_) => Vec::new(),
    };
    let timeout_secs = std::env::var("PLAYGROUND_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(30);
    let max_output_bytes = std::env::var("PLAYGROUND_MAX_OUTPUT_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1024 * 1024);
    let system_path =
        std::env::var("PLAYGROUND_PATH").unwrap_or_else(|_| DEFAULT_SYSTEM_PATH.to_string());

    let run_config = RunConfig::new(
        launcher,
        launcher_args,
        vec![("PATH".to_string(), system_path)],
        Duration::from_secs(timeout_secs),
        max_output_bytes,
    )?;

    let defaults = ToolPaths::default();
    let paths = ToolPaths {
        evaluate: std::env::var("PLAYGROUND_EVALUATE_BIN").unwrap_or(defaults.evaluate),
        format: std::env::var("PLAYGROUND_FORMAT_BIN").unwrap_or(defaults.format),
        compile: std::env::var("PLAYGROUND_COMPILE_BIN").unwrap_or(defaults.compile),
        shell: std::env::var("PLAYGROUND_SHELL").unwrap_or(defaults.shell),
    };

    let capacity = std::env::var("PLAYGROUND_CACHE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_CAPACITY);
    let capacity = NonZeroUsize::new(capacity)
        .ok_or_else(|| anyhow::anyhow!("PLAYGROUND_CACHE_CAPACITY must be greater than zero"))?;

    info!(
        launcher = run_config.launcher().unwrap_or("none"),
        timeout_secs,
        max_output_bytes,
        cache_capacity = capacity.get(),
        "playground configured"
    );
    Ok(Playground::new(
        ArgumentBuilder::new(paths),
        Arc::new(ProcessAdapter::new(run_config)),
        capacity,
    )?)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics.render(state.playground.cache_stats()) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            error!(error = %err, "failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "failed to render metrics" })),
            )
                .into_response()
        }
    }
}

async fn evaluate(State(state): State<AppState>, body: Bytes) -> Response {
    handle(state, Endpoint::Evaluate, body).await
}

async fn format(State(state): State<AppState>, body: Bytes) -> Response {
    handle(state, Endpoint::Format, body).await
}

async fn compile(State(state): State<AppState>, body: Bytes) -> Response {
    handle(state, Endpoint::Compile, body).await
}

/// Bodies that are not JSON fall through to the validator as `null` and are
/// rejected there like any other malformed request.
async fn handle(state: AppState, endpoint: Endpoint, body: Bytes) -> Response {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let result = match endpoint {
        Endpoint::Evaluate => state.playground.evaluate(&body).await,
        Endpoint::Format => state.playground.format(&body).await,
        Endpoint::Compile => state.playground.compile(&body).await,
    };
    match result {
        Ok(response) => {
            let outcome = if response.is_error() { "error" } else { "ok" };
            state.metrics.record_request(endpoint, outcome);
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => {
            error!(endpoint = endpoint.as_str(), error = %err, "sandbox execution failed");
            state.metrics.record_request(endpoint, "failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PlaygroundResponse::error(err.to_string())),
            )
                .into_response()
        }
    }
}
