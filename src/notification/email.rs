use std::sync::Arc;

use futures::FutureExt;

use crate::config::DelayConfig;
use crate::error::NotifyError;
use crate::events::{action, origin, EventDraft, EventLog};
use crate::metrics::QueueMetrics;
use crate::queue::QueueTransport;
use crate::store::TaskStore;

use super::join::{join_branches, Branch};
use super::types::EmailIntent;

/// Producer side: records the email step and publishes an [`EmailIntent`].
pub struct EmailChannel {
    tasks: Arc<dyn TaskStore>,
    queue: Arc<dyn QueueTransport>,
    events: EventLog,
    delay_seconds: u32,
}

impl EmailChannel {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        queue: Arc<dyn QueueTransport>,
        events: EventLog,
        delay_seconds: u32,
    ) -> Self {
        Self {
            tasks,
            queue,
            events,
            delay_seconds,
        }
    }

    #[tracing::instrument(
        name = "channel.email",
        skip(self),
        fields(task_id = %task_id, correlation_id = %correlation_id)
    )]
    pub async fn handle(&self, task_id: &str, correlation_id: &str) -> Result<(), NotifyError> {
        let mut task = self.tasks.get_by_id(task_id).await?;
        let body = EmailIntent::new(task_id, correlation_id).to_body()?;

        let draft = EventDraft::new(
            task_id,
            correlation_id,
            origin::EMAIL_CHANNEL,
            action::EMAIL_TASK_CREATED,
            "Email event sent",
        );
        let events = &self.events;
        let delay = self.delay_seconds;
        let queue = &self.queue;

        let branches: Vec<Branch> = vec![
            (
                "event".to_string(),
                async move {
                    events.append(draft, delay).await?;
                    Ok::<(), NotifyError>(())
                }
                .boxed(),
            ),
            (
                "publish".to_string(),
                async move {
                    let message_id = queue.send(&body).await?;
                    QueueMetrics::record_published();
                    tracing::debug!(message_id = %message_id, "Email intent published");
                    Ok::<(), NotifyError>(())
                }
                .boxed(),
            ),
        ];
        join_branches("email channel", branches).await?;

        task.email_sent = true;
        self.tasks.update(&task).await?;

        tracing::info!("Email intent enqueued");
        Ok(())
    }
}

/// Consumer side: runs once per dequeued [`EmailIntent`].
pub struct EmailDelivery {
    events: EventLog,
    created_delay: u32,
    sent_delay: u32,
}

impl EmailDelivery {
    pub fn new(events: EventLog, delays: &DelayConfig) -> Self {
        Self {
            events,
            created_delay: delays.email_created,
            sent_delay: delays.email_delivery_sent,
        }
    }

    /// Append the "created" then the "sent for delivery" event; the first
    /// failure stops the sequence.
    #[tracing::instrument(
        name = "email.deliver",
        skip(self, intent),
        fields(task_id = %intent.task_id, correlation_id = %intent.correlation_id)
    )]
    pub async fn deliver(&self, intent: &EmailIntent) -> Result<(), NotifyError> {
        self.events
            .append(
                EventDraft::new(
                    &intent.task_id,
                    &intent.correlation_id,
                    origin::EMAIL_DELIVERY,
                    action::EMAIL_CREATED,
                    "Email successfully created in database",
                ),
                self.created_delay,
            )
            .await?;

        self.events
            .append(
                EventDraft::new(
                    &intent.task_id,
                    &intent.correlation_id,
                    origin::EMAIL_DELIVERY,
                    action::EMAIL_DELIVERY_SENT,
                    "Email sent for delivery",
                ),
                self.sent_delay,
            )
            .await?;

        tracing::info!("Email handed off for delivery");
        Ok(())
    }
}
