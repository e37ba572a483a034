//! Append-only audit trail of pipeline steps.
//!
//! Every step of a notification request writes one [`Event`] tied to the
//! task and the request's correlation id. Each event carries a synthetic
//! `emit_at = created_at + delay` so a reader can replay the steps of one
//! request in pipeline order.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::NotifyError;
use crate::metrics::EventMetrics;
use crate::store::StoreError;

/// Component names written to `Event::origin`.
pub mod origin {
    pub const IN_APP_CHANNEL: &str = "in-app channel";
    pub const EMAIL_CHANNEL: &str = "email channel";
    pub const EMAIL_DELIVERY: &str = "email delivery";
}

/// Action identifiers written to `Event::action`.
pub mod action {
    pub const IN_APP_NOTIFICATION_CREATED: &str = "notification:db:in-app-notification-created";
    pub const EMAIL_TASK_CREATED: &str = "notification:event:email-task-created";
    pub const EMAIL_CREATED: &str = "email:db:email-created";
    pub const EMAIL_DELIVERY_SENT: &str = "email:third-party:email-delivery-sent";
}

/// A stored audit record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub task_id: String,
    pub correlation_id: String,
    pub origin: String,
    pub action: String,
    pub message: String,
    pub payload: Value,
    pub emit_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Offset of `emit_at` from `created_at`, in whole seconds.
    pub fn delay_seconds(&self) -> i64 {
        (self.emit_at - self.created_at).num_seconds()
    }
}

/// An event before the store has stamped it.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub id: Option<String>,
    pub task_id: String,
    pub correlation_id: String,
    pub origin: String,
    pub action: String,
    pub message: String,
    pub payload: Value,
}

impl EventDraft {
    pub fn new(
        task_id: impl Into<String>,
        correlation_id: impl Into<String>,
        origin: &str,
        action: &str,
        message: &str,
    ) -> Self {
        Self {
            id: None,
            task_id: task_id.into(),
            correlation_id: correlation_id.into(),
            origin: origin.to_string(),
            action: action.to_string(),
            message: message.to_string(),
            payload: Value::Object(Default::default()),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Assign id and timestamps. `now` is truncated to microseconds so the
    /// stamped value survives a round trip through a SQL timestamp column.
    pub fn stamp(self, now: DateTime<Utc>, delay_seconds: u32) -> Event {
        let created_at = now.trunc_subsecs(6);
        Event {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            task_id: self.task_id,
            correlation_id: self.correlation_id,
            origin: self.origin,
            action: self.action,
            message: self.message,
            payload: self.payload,
            emit_at: created_at + Duration::seconds(i64::from(delay_seconds)),
            created_at,
        }
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist exactly one row. Failures are returned, never retried.
    async fn create(&self, draft: EventDraft, delay_seconds: u32) -> Result<Event, StoreError>;

    async fn list_all(&self) -> Result<Vec<Event>, StoreError>;

    /// Events of one correlation id in [`pipeline_order`].
    async fn list_by_correlation(&self, correlation_id: &str) -> Result<Vec<Event>, StoreError>;
}

/// Sort by `emit_at`, ties broken by `created_at`.
pub fn pipeline_order(events: &mut [Event]) {
    events.sort_by(|a, b| {
        a.emit_at
            .cmp(&b.emit_at)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

/// Validating front for an [`EventStore`].
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn EventStore>,
}

impl EventLog {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Append one event. Empty task or correlation ids are rejected before
    /// anything is written.
    #[tracing::instrument(
        name = "event_log.append",
        skip(self, draft),
        fields(
            task_id = %draft.task_id,
            correlation_id = %draft.correlation_id,
            action = %draft.action,
        )
    )]
    pub async fn append(&self, draft: EventDraft, delay_seconds: u32) -> Result<Event, NotifyError> {
        if draft.task_id.trim().is_empty() {
            return Err(NotifyError::Validation("taskId must not be empty".into()));
        }
        if draft.correlation_id.trim().is_empty() {
            return Err(NotifyError::Validation(
                "correlationId must not be empty".into(),
            ));
        }

        let origin = draft.origin.clone();
        let started = Instant::now();
        match self.store.create(draft, delay_seconds).await {
            Ok(event) => {
                EventMetrics::record_appended(&origin, started.elapsed().as_secs_f64());
                tracing::debug!(
                    event_id = %event.id,
                    emit_at = %event.emit_at,
                    "Audit event appended"
                );
                Ok(event)
            }
            Err(e) => {
                EventMetrics::record_failure(&origin);
                tracing::error!(error = %e, origin = %origin, "Failed to append audit event");
                Err(e.into())
            }
        }
    }

    pub async fn list_all(&self) -> Result<Vec<Event>, NotifyError> {
        Ok(self.store.list_all().await?)
    }

    /// Events of one request in pipeline order (`emit_at`, then `created_at`).
    pub async fn list_by_correlation(&self, correlation_id: &str) -> Result<Vec<Event>, NotifyError> {
        Ok(self.store.list_by_correlation(correlation_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEventStore;

    /// Answers correlation lookups only; a full listing is an error.
    struct IndexedOnly(MemoryEventStore);

    #[async_trait]
    impl EventStore for IndexedOnly {
        async fn create(&self, draft: EventDraft, delay_seconds: u32) -> Result<Event, StoreError> {
            self.0.create(draft, delay_seconds).await
        }

        async fn list_all(&self) -> Result<Vec<Event>, StoreError> {
            Err(StoreError::Unavailable("full scan".into()))
        }

        async fn list_by_correlation(&self, correlation_id: &str) -> Result<Vec<Event>, StoreError> {
            self.0.list_by_correlation(correlation_id).await
        }
    }

    fn draft(correlation_id: &str) -> EventDraft {
        EventDraft::new(
            "T1",
            correlation_id,
            origin::EMAIL_DELIVERY,
            action::EMAIL_CREATED,
            "Email successfully created in database",
        )
    }

    #[test]
    fn test_stamp_sets_emit_at_from_delay() {
        let now = Utc::now();
        let event = draft("C1").stamp(now, 11);

        assert_eq!(event.emit_at, event.created_at + Duration::seconds(11));
        assert_eq!(event.delay_seconds(), 11);
        assert_eq!(event.payload, serde_json::json!({}));
        assert!(Uuid::parse_str(&event.id).is_ok());
    }

    #[test]
    fn test_stamp_keeps_explicit_id() {
        let event = draft("C1").with_id("evt-1").stamp(Utc::now(), 0);
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.emit_at, event.created_at);
    }

    #[tokio::test]
    async fn test_append_rejects_empty_ids() {
        let store = Arc::new(MemoryEventStore::new());
        let log = EventLog::new(store.clone());

        let err = log.append(draft(""), 6).await.unwrap_err();
        assert!(matches!(err, NotifyError::Validation(_)));

        let mut no_task = draft("C1");
        no_task.task_id = " ".into();
        assert!(log.append(no_task, 6).await.is_err());

        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_correlation_is_not_an_error() {
        let log = EventLog::new(Arc::new(MemoryEventStore::new()));
        log.append(draft("C1"), 6).await.unwrap();
        log.append(draft("C1"), 6).await.unwrap();

        assert_eq!(log.list_by_correlation("C1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_by_correlation_orders_by_emit_at() {
        let log = EventLog::new(Arc::new(MemoryEventStore::new()));
        log.append(draft("C1").with_id("late"), 14).await.unwrap();
        log.append(draft("C2").with_id("other"), 1).await.unwrap();
        log.append(draft("C1").with_id("early"), 6).await.unwrap();

        let ids: Vec<String> = log
            .list_by_correlation("C1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert_eq!(log.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_by_correlation_uses_store_lookup() {
        let log = EventLog::new(Arc::new(IndexedOnly(MemoryEventStore::new())));
        log.append(draft("C1"), 11).await.unwrap();
        log.append(draft("C2"), 11).await.unwrap();

        let events = log.list_by_correlation("C1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "C1");
        assert!(log.list_all().await.is_err());
    }
}
