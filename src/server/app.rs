use std::future::Future;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::handlers::{deliver_message, health, list_events, prometheus_metrics};
use super::AppState;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/events", get(list_events))
        .route("/messages", post(deliver_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the ops router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Ops HTTP listening");
    }
    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(shutdown)
        .await
}
