use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;

use crate::error::NotifyError;
use crate::events::{action, origin, EventDraft, EventLog};
use crate::store::{InAppNotification, InAppStore, TaskStore};

use super::join::{join_branches, Branch};

/// Writes in-app notifications for a task's creator and assignee.
pub struct InAppChannel {
    tasks: Arc<dyn TaskStore>,
    notifications: Arc<dyn InAppStore>,
    events: EventLog,
    delay_seconds: u32,
}

impl InAppChannel {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        notifications: Arc<dyn InAppStore>,
        events: EventLog,
        delay_seconds: u32,
    ) -> Self {
        Self {
            tasks,
            notifications,
            events,
            delay_seconds,
        }
    }

    #[tracing::instrument(
        name = "channel.in_app",
        skip(self),
        fields(task_id = %task_id, correlation_id = %correlation_id)
    )]
    pub async fn handle(&self, task_id: &str, correlation_id: &str) -> Result<(), NotifyError> {
        let mut task = self.tasks.get_by_id(task_id).await?;

        let mut recipients = vec![("creator", task.creator_id.clone())];
        if let Some(assignee) = task.assignee_id.as_deref().filter(|a| !a.is_empty()) {
            recipients.push(("assignee", assignee.to_string()));
        }

        let branches: Vec<Branch> = recipients
            .iter()
            .map(|(role, user_id)| {
                let notification = InAppNotification::for_task(&task, user_id);
                let store = &self.notifications;
                let work = async move {
                    store.create(notification).await?;
                    Ok::<(), NotifyError>(())
                }
                .boxed();
                (format!("{}:{}", role, user_id), work)
            })
            .collect();
        join_branches("in-app recipients", branches).await?;

        let user_ids: Vec<&str> = recipients.iter().map(|(_, id)| id.as_str()).collect();
        self.events
            .append(
                EventDraft::new(
                    task_id,
                    correlation_id,
                    origin::IN_APP_CHANNEL,
                    action::IN_APP_NOTIFICATION_CREATED,
                    "In-app notification created in database",
                )
                .with_payload(json!({ "recipients": user_ids })),
                self.delay_seconds,
            )
            .await?;

        task.in_app_sent = true;
        self.tasks.update(&task).await?;

        tracing::info!(recipients = recipients.len(), "In-app notifications created");
        Ok(())
    }
}
