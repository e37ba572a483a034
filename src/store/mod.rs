//! Collaborator contracts for task, in-app notification and event persistence.
//!
//! The notification pipeline only ever reads a task, flips its completion
//! flags, and inserts rows. Every backend implements the same traits so the
//! channels can run against Postgres in production and the in-memory maps in
//! tests and local runs.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::events::EventStore;

pub use memory::{MemoryEventStore, MemoryInAppStore, MemoryTaskStore};
pub use postgres::{PgEventStore, PgInAppStore, PgTaskStore, PostgresPool};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// The slice of a task record this subsystem reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub creator_id: String,
    pub assignee_id: Option<String>,
    pub email_sent: bool,
    pub in_app_sent: bool,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, creator_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            description: String::new(),
            creator_id: creator_id.into(),
            assignee_id: None,
            email_sent: false,
            in_app_sent: false,
            updated_at: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>, description: impl Into<String>) -> Self {
        self.title = title.into();
        self.description = description.into();
        self
    }

    pub fn with_assignee(mut self, assignee_id: impl Into<String>) -> Self {
        self.assignee_id = Some(assignee_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InAppNotification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InAppNotification {
    /// Unread notification for `user_id` carrying the task's title and description.
    pub fn for_task(task: &Task, user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: task.title.clone(),
            description: task.description.clone(),
            is_read: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Task, StoreError>;

    /// Persist `task`. Completion flags are OR-merged with the stored row, so
    /// a flag already set by a concurrent writer is never cleared.
    async fn update(&self, task: &Task) -> Result<(), StoreError>;
}

#[async_trait]
pub trait InAppStore: Send + Sync {
    async fn create(&self, notification: InAppNotification) -> Result<InAppNotification, StoreError>;
}

/// The three stores the pipeline writes to.
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskStore>,
    pub in_app: Arc<dyn InAppStore>,
    pub events: Arc<dyn EventStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            tasks: Arc::new(MemoryTaskStore::new()),
            in_app: Arc::new(MemoryInAppStore::new()),
            events: Arc::new(MemoryEventStore::new()),
        }
    }
}

/// Build the stores selected by `database.backend`.
pub async fn create_stores(config: &DatabaseConfig) -> Result<Stores, StoreError> {
    match config.backend.as_str() {
        "postgres" => {
            let pool = PostgresPool::connect(config).await?;
            tracing::info!(
                backend = "postgres",
                url = %pool.database_url_masked(),
                "Using PostgreSQL stores"
            );
            let pg = pool.pool().clone();
            Ok(Stores {
                tasks: Arc::new(PgTaskStore::new(pg.clone())),
                in_app: Arc::new(PgInAppStore::new(pg.clone())),
                events: Arc::new(PgEventStore::new(pg)),
            })
        }
        "memory" => {
            tracing::info!(backend = "memory", "Using in-memory stores");
            Ok(Stores::memory())
        }
        other => {
            tracing::warn!(
                backend = %other,
                "Unknown database backend, falling back to memory"
            );
            Ok(Stores::memory())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_app_notification_copies_task_content() {
        let task = Task::new("T1", "U1").with_title("Write docs", "The README");
        let notification = InAppNotification::for_task(&task, "U2");

        assert_eq!(notification.user_id, "U2");
        assert_eq!(notification.title, "Write docs");
        assert_eq!(notification.description, "The README");
        assert!(!notification.is_read);
        assert_eq!(notification.created_at, notification.updated_at);
    }

    #[test]
    fn test_task_serializes_camel_case() {
        let task = Task::new("T1", "U1").with_assignee("U2");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["creatorId"], "U1");
        assert_eq!(json["assigneeId"], "U2");
        assert_eq!(json["inAppSent"], false);
    }

    #[tokio::test]
    async fn test_create_stores_unknown_backend_falls_back() {
        let config = DatabaseConfig {
            backend: "cassandra".to_string(),
            ..Default::default()
        };
        let stores = create_stores(&config).await.unwrap();
        assert!(stores.events.list_all().await.unwrap().is_empty());
    }
}
