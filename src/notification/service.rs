use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DelayConfig;
use crate::error::NotifyError;
use crate::events::EventLog;
use crate::queue::{MessageHandler, QueueTransport};
use crate::store::Stores;

use super::email::{EmailChannel, EmailDelivery};
use super::in_app::InAppChannel;
use super::router::{Channel, NotificationRouter};
use super::types::{EmailIntent, NotificationRequest};

/// Acknowledgement returned for an accepted notification request.
pub const ACK: &str = "Notification sent";

/// Business entry point shared by every hosting mode.
pub struct NotificationService {
    router: NotificationRouter,
    delivery: EmailDelivery,
    events: EventLog,
}

impl NotificationService {
    pub fn new(router: NotificationRouter, delivery: EmailDelivery, events: EventLog) -> Self {
        Self {
            router,
            delivery,
            events,
        }
    }

    /// Wire the standard channel set: in-app first, then email.
    pub fn build(stores: &Stores, queue: Arc<dyn QueueTransport>, delays: &DelayConfig) -> Self {
        let events = EventLog::new(stores.events.clone());
        let router = NotificationRouter::new(vec![
            Channel::InApp(InAppChannel::new(
                stores.tasks.clone(),
                stores.in_app.clone(),
                events.clone(),
                delays.in_app_persisted,
            )),
            Channel::Email(EmailChannel::new(
                stores.tasks.clone(),
                queue,
                events.clone(),
                delays.email_enqueued,
            )),
        ]);
        let delivery = EmailDelivery::new(events.clone(), delays);
        Self::new(router, delivery, events)
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub async fn send_notification(
        &self,
        request: NotificationRequest,
    ) -> Result<&'static str, NotifyError> {
        request.validate()?;
        self.router.dispatch(&request).await?;
        Ok(ACK)
    }

    /// Email delivery for one queue body. Malformed bodies fail with
    /// `Validation` and stay on the queue.
    pub async fn handle_queue_message(&self, body: &str) -> Result<(), NotifyError> {
        let intent = EmailIntent::from_body(body)?;
        self.delivery.deliver(&intent).await
    }
}

#[async_trait]
impl MessageHandler for NotificationService {
    async fn handle(&self, body: &str) -> Result<(), NotifyError> {
        self.handle_queue_message(body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::events::EventStore;
    use crate::notification::ChannelKind;
    use crate::queue::MemoryQueueTransport;
    use crate::store::{MemoryEventStore, MemoryInAppStore, MemoryTaskStore, Task};
    use std::time::Duration;

    struct Harness {
        tasks: Arc<MemoryTaskStore>,
        in_app: Arc<MemoryInAppStore>,
        events: Arc<MemoryEventStore>,
        queue: Arc<MemoryQueueTransport>,
        service: NotificationService,
    }

    fn harness() -> Harness {
        let tasks = Arc::new(MemoryTaskStore::new());
        let in_app = Arc::new(MemoryInAppStore::new());
        let events = Arc::new(MemoryEventStore::new());
        let queue = Arc::new(MemoryQueueTransport::new(Duration::from_secs(30)));
        let stores = Stores {
            tasks: tasks.clone(),
            in_app: in_app.clone(),
            events: events.clone(),
        };
        let service = NotificationService::build(&stores, queue.clone(), &DelayConfig::default());
        Harness {
            tasks,
            in_app,
            events,
            queue,
            service,
        }
    }

    #[test]
    fn test_registration_order() {
        let h = harness();
        assert_eq!(
            h.service.router().channel_kinds(),
            vec![ChannelKind::InApp, ChannelKind::Email]
        );
    }

    #[tokio::test]
    async fn test_in_app_only_request() {
        let h = harness();
        h.tasks.insert(Task::new("T1", "U1"));

        let request = NotificationRequest::from_tokens("T1", "C1", ["IN_APP", "IN_APP"]);
        assert_eq!(h.service.send_notification(request).await.unwrap(), ACK);

        assert_eq!(h.in_app.len(), 1);
        assert!(h.queue.bodies().await.is_empty());
        let task = h.tasks.get("T1").unwrap();
        assert!(task.in_app_sent);
        assert!(!task.email_sent);
    }

    #[tokio::test]
    async fn test_unmapped_only_request_invokes_nothing() {
        let h = harness();
        h.tasks.insert(Task::new("T1", "U1"));

        let request = NotificationRequest::from_tokens("T1", "C1", ["SMS", "PUSH"]);
        let err = h.service.send_notification(request).await.unwrap_err();

        assert!(matches!(err, NotifyError::NoHandler { ref requested } if requested.len() == 2));
        assert_eq!(err.class(), ErrorClass::Validation);
        assert!(h.in_app.is_empty());
        assert_eq!(h.tasks.update_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_types_rejected() {
        let h = harness();
        let err = h
            .service
            .send_notification(NotificationRequest::new("T1", "C1", []))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::NoHandler { .. }));
    }

    #[tokio::test]
    async fn test_empty_ids_rejected_before_dispatch() {
        let h = harness();
        h.tasks.insert(Task::new("T1", "U1"));
        let err = h
            .service
            .send_notification(NotificationRequest::new("T1", "", [ChannelKind::InApp]))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Validation(_)));
        assert!(h.in_app.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_when_one_channel_fails() {
        let h = harness();
        h.tasks.insert(Task::new("T1", "U1"));
        h.in_app.fail_for_user("U1");

        let request =
            NotificationRequest::new("T1", "C1", [ChannelKind::InApp, ChannelKind::Email]);
        let err = h.service.send_notification(request).await.unwrap_err();

        assert_eq!(err.class(), ErrorClass::Partial);
        match &err {
            NotifyError::Branches(b) => assert_eq!(b.failed_branches(), vec!["IN_APP"]),
            other => panic!("unexpected error: {other:?}"),
        }
        // The email branch ran to completion
        assert_eq!(h.queue.bodies().await.len(), 1);
        assert!(h.tasks.get("T1").unwrap().email_sent);
    }

    #[tokio::test]
    async fn test_handle_queue_message() {
        let h = harness();
        h.service
            .handle_queue_message(r#"{"taskId":"T1","correlationId":"C1"}"#)
            .await
            .unwrap();
        assert_eq!(h.service.events().list_by_correlation("C1").await.unwrap().len(), 2);

        let err = h.service.handle_queue_message("{").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Validation);
        assert_eq!(h.events.list_all().await.unwrap().len(), 2);
    }
}
