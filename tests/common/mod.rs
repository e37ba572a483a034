//! Shared in-memory wiring for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use task_notification_service::config::DelayConfig;
use task_notification_service::events::{Event, EventStore};
use task_notification_service::notification::NotificationService;
use task_notification_service::queue::MemoryQueueTransport;
use task_notification_service::store::{
    MemoryEventStore, MemoryInAppStore, MemoryTaskStore, Stores, Task,
};

pub struct Harness {
    pub tasks: Arc<MemoryTaskStore>,
    pub in_app: Arc<MemoryInAppStore>,
    pub events: Arc<MemoryEventStore>,
    pub queue: Arc<MemoryQueueTransport>,
    pub delays: DelayConfig,
    pub service: Arc<NotificationService>,
}

impl Harness {
    /// Task `T1` created by `U1` and assigned to `U2`.
    pub fn new() -> Self {
        Self::with_visibility(Duration::from_secs(30))
    }

    pub fn with_visibility(visibility_timeout: Duration) -> Self {
        let tasks = Arc::new(MemoryTaskStore::new());
        tasks.insert(
            Task::new("T1", "U1")
                .with_title("Quarterly report", "Compile Q3 numbers")
                .with_assignee("U2"),
        );
        let in_app = Arc::new(MemoryInAppStore::new());
        let events = Arc::new(MemoryEventStore::new());
        let queue = Arc::new(MemoryQueueTransport::new(visibility_timeout));
        let delays = DelayConfig::default();

        let stores = Stores {
            tasks: tasks.clone(),
            in_app: in_app.clone(),
            events: events.clone(),
        };
        let service = Arc::new(NotificationService::build(&stores, queue.clone(), &delays));

        Self {
            tasks,
            in_app,
            events,
            queue,
            delays,
            service,
        }
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.list_all().await.unwrap()
    }
}
