//! Prometheus metrics for the notification pipeline.
//!
//! - Dispatch metrics (router outcomes, latency, per-channel outcomes)
//! - Event log metrics (appends per origin, append failures)
//! - Queue metrics (publish, receive, ack, handler/delete/receive failures)
//! - Function trigger metrics (invocations per payload kind)

mod helpers;

pub use helpers::{encode_metrics, DispatchMetrics, EventMetrics, FunctionMetrics, QueueMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Histogram, HistogramVec, IntCounter, IntCounterVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "notify";

lazy_static! {
    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Router dispatch calls by outcome (ok, not_found, validation, transient, partial)
    pub static ref DISPATCH_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatch_total", METRIC_PREFIX),
        "Total notification dispatches by outcome",
        &["outcome"]
    ).unwrap();

    /// End-to-end dispatch latency
    pub static ref DISPATCH_LATENCY: Histogram = register_histogram!(
        format!("{}_dispatch_latency_seconds", METRIC_PREFIX),
        "Notification dispatch latency in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();

    /// Channel strategy runs by channel and outcome
    pub static ref CHANNEL_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_channel_outcomes_total", METRIC_PREFIX),
        "Channel strategy outcomes",
        &["channel", "outcome"]
    ).unwrap();

    // ============================================================================
    // Event Log Metrics
    // ============================================================================

    /// Audit events appended by origin
    pub static ref EVENTS_APPENDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_appended_total", METRIC_PREFIX),
        "Total audit events appended",
        &["origin"]
    ).unwrap();

    /// Audit event append failures by origin
    pub static ref EVENT_APPEND_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_event_append_failures_total", METRIC_PREFIX),
        "Total audit event append failures",
        &["origin"]
    ).unwrap();

    /// Event store write latency
    pub static ref EVENT_APPEND_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_event_append_latency_seconds", METRIC_PREFIX),
        "Audit event append latency in seconds",
        &["origin"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]
    ).unwrap();

    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Messages published to the email queue
    pub static ref QUEUE_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_published_total", METRIC_PREFIX),
        "Total messages published to the queue"
    ).unwrap();

    /// Messages handed to the consumer
    pub static ref QUEUE_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_received_total", METRIC_PREFIX),
        "Total messages received from the queue"
    ).unwrap();

    /// Messages received more than once
    pub static ref QUEUE_REDELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_redelivered_total", METRIC_PREFIX),
        "Total messages received after an earlier lease expired"
    ).unwrap();

    /// Messages deleted after a successful handler run
    pub static ref QUEUE_ACKED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_acked_total", METRIC_PREFIX),
        "Total messages acknowledged (deleted)"
    ).unwrap();

    /// Handler failures (message left for redelivery)
    pub static ref QUEUE_HANDLER_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_handler_failures_total", METRIC_PREFIX),
        "Total message handler failures"
    ).unwrap();

    /// Delete calls that failed after the handler succeeded
    pub static ref QUEUE_DELETE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_delete_failures_total", METRIC_PREFIX),
        "Total failed message deletes"
    ).unwrap();

    /// Receive calls that errored or timed out
    pub static ref QUEUE_RECEIVE_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_receive_errors_total", METRIC_PREFIX),
        "Total failed receive calls"
    ).unwrap();

    // ============================================================================
    // Function Trigger Metrics
    // ============================================================================

    /// Function invocations by payload kind and outcome
    pub static ref FUNCTION_INVOCATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_function_invocations_total", METRIC_PREFIX),
        "Total function invocations",
        &["kind", "outcome"]
    ).unwrap();
}
