//! PostgreSQL-backed stores.
//!
//! Tables are owned by the task platform and already exist:
//! - `tasks` (read, completion flags updated)
//! - `in_app_notifications` (insert only)
//! - `task_system_events` (insert and list; `json_data` holds the payload as text)

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::events::{Event, EventDraft, EventStore};

use super::{InAppNotification, InAppStore, StoreError, Task, TaskStore};

/// PostgreSQL connection pool.
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
    database_url: String,
}

impl PostgresPool {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds as u64))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds as u64))
            .connect(&config.url)
            .await?;

        tracing::info!(
            pool_size = config.pool_size,
            "PostgreSQL connection pool created"
        );

        Ok(Self {
            pool,
            database_url: config.url.clone(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the database URL (masked for logging).
    pub fn database_url_masked(&self) -> String {
        mask_url(&self.database_url)
    }
}

fn mask_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // "postgres://" has its own colon; only mask when a password segment exists
            if url[..colon_pos].contains("//") {
                let prefix = &url[..colon_pos + 1];
                let suffix = &url[at_pos..];
                return format!("{}***{}", prefix, suffix);
            }
        }
    }
    url.to_string()
}

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn get_by_id(&self, id: &str) -> Result<Task, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, COALESCE(description, '') AS description, creator_id,
                   assignee_id, email_sent, in_app_sent, updated_at
            FROM tasks
            WHERE id = $1 AND deleted = false
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "task",
            id: id.to_string(),
        })?;

        let updated_at: NaiveDateTime = row.try_get("updated_at")?;
        Ok(Task {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            creator_id: row.try_get("creator_id")?,
            assignee_id: row.try_get("assignee_id")?,
            email_sent: row.try_get("email_sent")?,
            in_app_sent: row.try_get("in_app_sent")?,
            updated_at: updated_at.and_utc(),
        })
    }

    async fn update(&self, task: &Task) -> Result<(), StoreError> {
        // OR-merge inside the UPDATE so concurrent channels cannot clear each other's flag
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET email_sent = email_sent OR $1,
                in_app_sent = in_app_sent OR $2,
                updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(task.email_sent)
        .bind(task.in_app_sent)
        .bind(Utc::now().naive_utc())
        .bind(&task.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "task",
                id: task.id.clone(),
            });
        }
        Ok(())
    }
}

pub struct PgInAppStore {
    pool: PgPool,
}

impl PgInAppStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InAppStore for PgInAppStore {
    async fn create(&self, notification: InAppNotification) -> Result<InAppNotification, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO in_app_notifications
                (id, user_id, title, description, is_read, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&notification.id)
        .bind(&notification.user_id)
        .bind(&notification.title)
        .bind(&notification.description)
        .bind(notification.is_read)
        .bind(notification.created_at.naive_utc())
        .bind(notification.updated_at.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(notification)
    }
}

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn create(&self, draft: EventDraft, delay_seconds: u32) -> Result<Event, StoreError> {
        let event = draft.stamp(Utc::now(), delay_seconds);
        let json_data = serde_json::to_string(&event.payload)
            .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO task_system_events
                (id, task_id, correlation_id, origin, action, message, json_data, emit_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&event.id)
        .bind(&event.task_id)
        .bind(&event.correlation_id)
        .bind(&event.origin)
        .bind(&event.action)
        .bind(&event.message)
        .bind(&json_data)
        .bind(event.emit_at.naive_utc())
        .bind(event.created_at.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(event)
    }

    async fn list_all(&self) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, correlation_id, origin, action, message, json_data,
                   emit_at, created_at
            FROM task_system_events
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn list_by_correlation(&self, correlation_id: &str) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, correlation_id, origin, action, message, json_data,
                   emit_at, created_at
            FROM task_system_events
            WHERE correlation_id = $1
            ORDER BY emit_at ASC, created_at ASC
            "#,
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: &sqlx::postgres::PgRow) -> Result<Event, StoreError> {
    let json_data: Option<String> = row.try_get("json_data")?;
    let payload = match json_data.as_deref() {
        None | Some("") => serde_json::json!({}),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| StoreError::InvalidRecord(format!("json_data: {}", e)))?,
    };
    let emit_at: NaiveDateTime = row.try_get("emit_at")?;
    let created_at: NaiveDateTime = row.try_get("created_at")?;

    Ok(Event {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        correlation_id: row.try_get("correlation_id")?,
        origin: row.try_get("origin")?,
        action: row.try_get("action")?,
        message: row.try_get("message")?,
        payload,
        emit_at: emit_at.and_utc(),
        created_at: created_at.and_utc(),
    })
}
