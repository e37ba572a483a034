//! In-memory stores using DashMap.
//!
//! Data is lost on restart. Each store can be switched into a failing mode
//! so callers can exercise their error paths without a database.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::events::{pipeline_order, Event, EventDraft, EventStore};

use super::{InAppNotification, InAppStore, StoreError, Task, TaskStore};

/// In-memory task table.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<String, Task>,
    updates: AtomicU64,
    failing: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.get(id).map(|t| t.clone())
    }

    /// Number of successful `update` calls
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Make `update` fail with `Unavailable` until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get_by_id(&self, id: &str) -> Result<Task, StoreError> {
        self.tasks
            .get(id)
            .map(|t| t.clone())
            .ok_or_else(|| StoreError::NotFound {
                entity: "task",
                id: id.to_string(),
            })
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("task store failing".into()));
        }

        let mut stored = self
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "task",
                id: task.id.clone(),
            })?;

        // Entry guard holds the shard lock, so the merge is atomic per row
        let email_sent = stored.email_sent || task.email_sent;
        let in_app_sent = stored.in_app_sent || task.in_app_sent;
        *stored = Task {
            email_sent,
            in_app_sent,
            updated_at: Utc::now(),
            ..task.clone()
        };
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// In-memory in-app notification table.
#[derive(Default)]
pub struct MemoryInAppStore {
    notifications: DashMap<String, InAppNotification>,
    failing_users: DashMap<String, ()>,
}

impl MemoryInAppStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every create addressed to `user_id`.
    pub fn fail_for_user(&self, user_id: &str) {
        self.failing_users.insert(user_id.to_string(), ());
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn for_user(&self, user_id: &str) -> Vec<InAppNotification> {
        self.notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.clone())
            .collect()
    }
}

#[async_trait]
impl InAppStore for MemoryInAppStore {
    async fn create(&self, notification: InAppNotification) -> Result<InAppNotification, StoreError> {
        if self.failing_users.contains_key(&notification.user_id) {
            return Err(StoreError::Unavailable(format!(
                "in-app store rejected user {}",
                notification.user_id
            )));
        }
        self.notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(notification)
    }
}

/// In-memory event table preserving insertion order.
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<Event>>,
    failing: AtomicBool,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn create(&self, draft: EventDraft, delay_seconds: u32) -> Result<Event, StoreError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("event store failing".into()));
        }
        let event = draft.stamp(Utc::now(), delay_seconds);
        self.events.write().await.push(event.clone());
        Ok(event)
    }

    async fn list_all(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.events.read().await.clone())
    }

    async fn list_by_correlation(&self, correlation_id: &str) -> Result<Vec<Event>, StoreError> {
        let mut events: Vec<Event> = self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect();
        pipeline_order(&mut events);
        Ok(events)
    }
}
