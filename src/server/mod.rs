pub mod health;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use health::HealthCheck;

use crate::error::{AcmeError, Result};
use crate::metrics::SharedMetrics;

#[derive(Clone)]
struct AppState {
    metrics: SharedMetrics,
    health: Arc<HealthCheck>,
}

impl axum::extract::FromRef<AppState> for Arc<HealthCheck> {
    fn from_ref(state: &AppState) -> Self {
        state.health.clone()
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.gather_text()
}

/// Serves `/metrics` and `/healthz`, per spec §6.
pub async fn start_server(addr: SocketAddr, metrics: SharedMetrics, health: Arc<HealthCheck>) -> Result<()> {
    let state = AppState { metrics, health };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health::health_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AcmeError::transport(format!("failed to bind metrics server: {e}")))?;

    tracing::info!(%addr, "metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| AcmeError::transport(format!("metrics server error: {e}")))?;

    Ok(())
}
