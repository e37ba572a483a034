use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::events::Event;
use crate::metrics;
use crate::notification::EmailIntent;

use super::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub mode: String,
    pub channels: Vec<String>,
    pub queue: BackendHealth,
    pub database: BackendHealth,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendHealth {
    pub backend: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let channels = state
        .service
        .router()
        .channel_kinds()
        .iter()
        .map(|kind| kind.as_str().to_string())
        .collect();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        mode: state.mode.to_string(),
        channels,
        queue: BackendHealth {
            backend: state.settings.queue.backend.clone(),
        },
        database: BackendHealth {
            backend: state.settings.database.backend.clone(),
        },
    })
}

/// GET /metrics - Prometheus text exposition
pub async fn prometheus_metrics() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventsResponse {
    pub count: usize,
    pub events: Vec<Event>,
}

/// GET /events - all audit events, or one correlation ordered by emit time.
/// A blank `correlation_id` is rejected.
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>> {
    let events = match query.correlation_id.as_deref() {
        Some(id) if id.trim().is_empty() => {
            return Err(AppError::Validation(
                "correlation_id must not be blank".to_string(),
            ));
        }
        Some(id) => state.service.events().list_by_correlation(id).await?,
        None => state.service.events().list_all().await?,
    };

    Ok(Json(EventsResponse {
        count: events.len(),
        events,
    }))
}

/// POST /messages - run one email intent through delivery, as the consumer would
#[tracing::instrument(name = "http.deliver_message", skip(state, body))]
pub async fn deliver_message(
    State(state): State<AppState>,
    body: String,
) -> Result<(StatusCode, Json<Value>)> {
    let intent = EmailIntent::from_body(&body)?;
    state.service.handle_queue_message(&body).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "delivered",
            "taskId": intent.task_id,
            "correlationId": intent.correlation_id,
        })),
    ))
}
