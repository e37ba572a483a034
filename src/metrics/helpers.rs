//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CHANNEL_OUTCOMES_TOTAL, DISPATCH_LATENCY, DISPATCH_TOTAL, EVENTS_APPENDED_TOTAL,
    EVENT_APPEND_FAILURES_TOTAL, EVENT_APPEND_LATENCY, FUNCTION_INVOCATIONS_TOTAL,
    QUEUE_ACKED_TOTAL, QUEUE_DELETE_FAILURES_TOTAL, QUEUE_HANDLER_FAILURES_TOTAL,
    QUEUE_PUBLISHED_TOTAL, QUEUE_RECEIVED_TOTAL, QUEUE_RECEIVE_ERRORS_TOTAL,
    QUEUE_REDELIVERED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording router and channel metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a finished dispatch and its latency
    pub fn record_dispatch(outcome: &str, latency_secs: f64) {
        DISPATCH_TOTAL.with_label_values(&[outcome]).inc();
        DISPATCH_LATENCY.observe(latency_secs);
    }

    /// Record one channel strategy run
    pub fn record_channel(channel: &str, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        CHANNEL_OUTCOMES_TOTAL
            .with_label_values(&[channel, outcome])
            .inc();
    }
}

/// Helper struct for recording event log metrics
pub struct EventMetrics;

impl EventMetrics {
    pub fn record_appended(origin: &str, latency_secs: f64) {
        EVENTS_APPENDED_TOTAL.with_label_values(&[origin]).inc();
        EVENT_APPEND_LATENCY
            .with_label_values(&[origin])
            .observe(latency_secs);
    }

    pub fn record_failure(origin: &str) {
        EVENT_APPEND_FAILURES_TOTAL.with_label_values(&[origin]).inc();
    }
}

/// Helper struct for recording queue metrics
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn record_published() {
        QUEUE_PUBLISHED_TOTAL.inc();
    }

    pub fn record_received(count: u64) {
        QUEUE_RECEIVED_TOTAL.inc_by(count);
    }

    pub fn record_redelivered() {
        QUEUE_REDELIVERED_TOTAL.inc();
    }

    pub fn record_acked() {
        QUEUE_ACKED_TOTAL.inc();
    }

    pub fn record_handler_failure() {
        QUEUE_HANDLER_FAILURES_TOTAL.inc();
    }

    pub fn record_delete_failure() {
        QUEUE_DELETE_FAILURES_TOTAL.inc();
    }

    pub fn record_receive_error() {
        QUEUE_RECEIVE_ERRORS_TOTAL.inc();
    }
}

/// Helper struct for recording function trigger metrics
pub struct FunctionMetrics;

impl FunctionMetrics {
    /// Record one invocation (`kind` is "queue_batch" or "notification")
    pub fn record_invocation(kind: &str, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        FUNCTION_INVOCATIONS_TOTAL
            .with_label_values(&[kind, outcome])
            .inc();
    }
}
