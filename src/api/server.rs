//! Axum API server for the decoder.

use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::decoder::Decoder;
use crate::health::UsageMetrics;

/// Maximum accepted request body: 1 MiB.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub decoder: Arc<Decoder>,
}

impl AppState {
    pub fn new(decoder: Arc<Decoder>) -> Self {
        Self { decoder }
    }

    pub fn metrics(&self) -> &Arc<UsageMetrics> {
        self.decoder.metrics()
    }
}

/// GET /api/: service banner.
async fn root() -> Json<Value> {
    Json(json!({ "message": "JD Decoder API" }))
}

/// CORS layer: any origin when `origins` is empty, otherwise the exact list.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
}

/// Build the axum router with all API routes.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/api", get(root))
        .route("/api/", get(root))
        .route("/api/health", get(super::routes::health::get_health))
        .route("/api/metrics", get(super::routes::metrics::get_metrics))
        .route("/api/decode", post(super::routes::decode::decode))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

/// Start the API server and run until `shutdown` resolves.
pub async fn start_server<F>(
    config: &ServerConfig,
    state: AppState,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics = Arc::clone(state.metrics());
    let app = build_router(state, config);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("JD Decoder API listening on {addr}");

    metrics.set_ready(true);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    metrics.set_ready(false);
    served?;
    Ok(())
}
