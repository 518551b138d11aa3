use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        DefaultBodyLimit, Query, State,
    },
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::constants::server;
use crate::error::{Result, SketchError};
use crate::pipeline::{ProcessedImage, SketchPipeline};

/// Web server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_size: usize,
    pub max_concurrent_requests: usize,
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: server::DEFAULT_HOST.to_string(),
            port: server::DEFAULT_PORT,
            max_body_size: server::DEFAULT_MAX_BODY_SIZE,
            max_concurrent_requests: server::DEFAULT_MAX_CONCURRENT_REQUESTS,
            cors_enabled: true,
        }
    }
}

/// Query string of `/process` and `/compare`.
///
/// `postprocess_value` is kept as text so that a malformed value surfaces as a
/// processing error instead of an extractor rejection.
#[derive(Debug, Default)]
pub struct ProcessQuery {
    pub model_id: Option<String>,
    pub postprocess_value: Option<String>,
}

impl ProcessQuery {
    /// Picks the first occurrence of each known key; unknown keys are ignored.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = ProcessQuery::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "model_id" => &mut query.model_id,
                "postprocess_value" => &mut query.postprocess_value,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        query
    }

    fn postprocess_value(&self) -> Result<i64> {
        match self.postprocess_value {
            Some(ref value) => Ok(value.trim().parse::<i64>()?),
            None => Ok(0),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub available_models: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub models: usize,
}

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<SketchPipeline>,
    limiter: Arc<Semaphore>,
    metrics: Option<PrometheusHandle>,
    started: Instant,
}

/// Web API server
pub struct WebServer {
    config: ServerConfig,
    state: AppState,
}

impl WebServer {
    pub fn new(config: ServerConfig, pipeline: SketchPipeline, metrics: Option<PrometheusHandle>) -> Self {
        let permits = config.max_concurrent_requests.max(1);
        Self {
            config,
            state: AppState {
                pipeline: Arc::new(pipeline),
                limiter: Arc::new(Semaphore::new(permits)),
                metrics,
                started: Instant::now(),
            },
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/process", post(process_handler))
            .route("/compare", post(process_handler))
            .route("/models", get(models_handler))
            .route("/api/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(self.state.clone());

        if self.config.cors_enabled {
            router.layer(middleware::map_response(add_cors_headers))
        } else {
            router
        }
    }

    /// Binds the configured address and serves until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| SketchError::Server(format!("Failed to bind {}:{}: {}", self.config.host, self.config.port, e)))?;
        self.serve_on(listener, shutdown_signal()).await
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!("Starting sketch server on http://{}", addr);
        info!("Available models: {:?}", self.state.pipeline.registry().keys());
        info!("API endpoints:");
        info!("  POST /process?model_id=<key>&postprocess_value=<n>");
        info!("  POST /compare?model_id=<key>&postprocess_value=<n>");
        info!("  GET  /models");
        info!("  GET  /api/health");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| SketchError::Server(e.to_string()))?;

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
    }
}

fn error_response(err: &SketchError) -> Response {
    error!("{}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", err)).into_response()
}

async fn process_handler(
    State(state): State<AppState>,
    query: std::result::Result<Query<Vec<(String, String)>>, QueryRejection>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("request", request_id = %request_id);

    async move {
        match run_pipeline(&state, query, body).await {
            Ok(processed) => {
                info!(
                    model = %processed.model_key,
                    iterations = processed.iterations,
                    elapsed_ms = processed.elapsed.as_millis() as u64,
                    "Request completed"
                );
                let headers = [
                    (header::CONTENT_TYPE, HeaderValue::from_static("image/png")),
                    (
                        header::HeaderName::from_static("x-request-id"),
                        HeaderValue::from_str(&request_id).unwrap_or_else(|_| HeaderValue::from_static("unknown")),
                    ),
                ];
                (StatusCode::OK, headers, processed.png).into_response()
            }
            Err(e) => error_response(&e),
        }
    }
    .instrument(span)
    .await
}

async fn run_pipeline(
    state: &AppState,
    query: std::result::Result<Query<Vec<(String, String)>>, QueryRejection>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<ProcessedImage> {
    let Query(pairs) = query.map_err(|e| SketchError::InvalidInput(e.body_text()))?;
    let query = ProcessQuery::from_pairs(pairs);
    let body = body.map_err(|e| SketchError::InvalidInput(e.body_text()))?;
    let postprocess_value = query.postprocess_value()?;

    let permit = state
        .limiter
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| SketchError::Server(e.to_string()))?;
    metrics::increment_gauge!("sketchgan_active_requests", 1.0);

    let pipeline = state.pipeline.clone();
    let span = tracing::Span::current();
    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        let _enter = span.enter();
        pipeline.process(query.model_id.as_deref(), postprocess_value, &body)
    })
    .await;

    metrics::decrement_gauge!("sketchgan_active_requests", 1.0);
    result.map_err(|e| SketchError::Server(format!("Processing task failed: {}", e)))?
}

async fn models_handler(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        available_models: state.pipeline.registry().keys(),
    })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        models: state.pipeline.registry().len(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(ref handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Telemetry is disabled").into_response(),
    }
}

async fn add_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}
