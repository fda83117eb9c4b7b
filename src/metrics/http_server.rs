//! HTTP server for the Prometheus scrape endpoint.
//!
//! Serves `/metrics` plus a `/health` liveness route. The listener is bound
//! by the caller so a bad port fails startup synchronously.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Metrics;

#[derive(Clone)]
struct ServerState {
    metrics: Arc<Metrics>,
    started: Instant,
}

/// Serve the metrics endpoint on an already-bound listener until cancelled.
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let state = ServerState {
        metrics,
        started: Instant::now(),
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    info!(addr = %listener.local_addr()?, "Starting metrics server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn metrics_handler(State(state): State<ServerState>) -> impl IntoResponse {
    state
        .metrics
        .application_uptime_seconds
        .set(state.started.elapsed().as_secs_f64());

    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("failed to encode metrics: {e}"),
        ),
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
