use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::error::NotifyError;
use crate::metrics::FunctionMetrics;
use crate::notification::{NotificationRequest, NotificationService};
use crate::queue::ExponentialBackoff;
use crate::shutdown::sleep_or_shutdown;

use super::runtime::{Invocation, RuntimeApiClient, RuntimeError};

/// Event shapes a function invocation may carry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum InboundEvent {
    QueueBatch(QueueBatch),
    Direct(DirectRequest),
}

#[derive(Debug, Deserialize)]
pub struct QueueBatch {
    #[serde(rename = "Records")]
    pub records: Vec<QueueRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub message_id: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectRequest {
    pub task_id: String,
    pub correlation_id: String,
    #[serde(default)]
    pub types: Vec<String>,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::QueueBatch(_) => "queue_batch",
            InboundEvent::Direct(_) => "direct",
        }
    }
}

/// Per-invocation handler over the shared [`NotificationService`].
#[derive(Clone)]
pub struct FunctionTrigger {
    service: Arc<NotificationService>,
}

impl FunctionTrigger {
    pub fn new(service: Arc<NotificationService>) -> Self {
        Self { service }
    }

    /// Handle one invocation payload. A queue batch fails on the first
    /// record that fails so the host redelivers the batch.
    pub async fn invoke(&self, payload: Value) -> Result<Value, NotifyError> {
        let event: InboundEvent = serde_json::from_value(payload).map_err(|e| {
            NotifyError::Validation(format!("unrecognized invocation payload: {}", e))
        })?;
        let kind = event.kind();

        let result = match event {
            InboundEvent::QueueBatch(batch) => self.handle_batch(batch).await,
            InboundEvent::Direct(request) => self.handle_direct(request).await,
        };

        FunctionMetrics::record_invocation(kind, result.is_ok());
        result
    }

    async fn handle_batch(&self, batch: QueueBatch) -> Result<Value, NotifyError> {
        let total = batch.records.len();
        for record in batch.records {
            if let Err(e) = self.service.handle_queue_message(&record.body).await {
                tracing::error!(
                    message_id = %record.message_id,
                    error = %e,
                    "Queue record failed, failing invocation"
                );
                return Err(e);
            }
            tracing::debug!(message_id = %record.message_id, "Queue record delivered");
        }
        Ok(json!({ "processed": total }))
    }

    async fn handle_direct(&self, request: DirectRequest) -> Result<Value, NotifyError> {
        let request = NotificationRequest::from_tokens(
            request.task_id,
            request.correlation_id,
            request.types,
        );
        let ack = self.service.send_notification(request).await?;
        Ok(json!({ "ack": ack }))
    }
}

/// Time kept back from the deadline to report the outcome.
const REPORT_MARGIN: Duration = Duration::from_millis(200);

/// `errorType` reported when an invocation outlives its deadline.
const TIMEOUT_ERROR_TYPE: &str = "timeout";

/// Pulls invocations from the runtime API and reports each outcome.
pub struct FunctionHost {
    client: RuntimeApiClient,
    trigger: FunctionTrigger,
}

impl FunctionHost {
    pub fn new(client: RuntimeApiClient, trigger: FunctionTrigger) -> Self {
        Self { client, trigger }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(runtime_api = %self.client.base_url(), "Function host started");
        let mut backoff = ExponentialBackoff::new();

        loop {
            // Only the wait for the next invocation is cancellable.
            let next = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Function host received shutdown signal");
                    break;
                }
                next = self.client.next_invocation() => next,
            };

            match next {
                Ok(invocation) => {
                    backoff.reset();
                    if let Err(e) = self.complete(invocation).await {
                        tracing::error!(error = %e, "Failed to report invocation outcome");
                    }
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Runtime API unavailable"
                    );
                    if sleep_or_shutdown(delay, &mut shutdown).await {
                        tracing::info!("Function host received shutdown signal");
                        break;
                    }
                }
            }
        }

        tracing::info!("Function host stopped");
    }

    /// Fetch, handle and report a single invocation without the shutdown
    /// and retry handling of [`FunctionHost::run`].
    pub async fn handle_next(&self) -> Result<(), RuntimeError> {
        let invocation = self.client.next_invocation().await?;
        self.complete(invocation).await
    }

    #[tracing::instrument(
        name = "function.invocation",
        skip(self, invocation),
        fields(request_id = %invocation.request_id)
    )]
    async fn complete(&self, invocation: Invocation) -> Result<(), RuntimeError> {
        let budget = invocation.budget(Utc::now().timestamp_millis(), REPORT_MARGIN);
        let work = self.trigger.invoke(invocation.payload);
        let result = match budget {
            Some(budget) => match tokio::time::timeout(budget, work).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        budget_ms = budget.as_millis() as u64,
                        "Invocation ran past its deadline"
                    );
                    return self
                        .client
                        .fail(
                            &invocation.request_id,
                            TIMEOUT_ERROR_TYPE,
                            "invocation exceeded its deadline",
                        )
                        .await;
                }
            },
            None => work.await,
        };

        match result {
            Ok(body) => self.client.respond(&invocation.request_id, &body).await,
            Err(e) => {
                tracing::warn!(error = %e, class = e.class().as_str(), "Invocation failed");
                self.client
                    .fail(&invocation.request_id, e.class().as_str(), &e.to_string())
                    .await
            }
        }
    }
}
