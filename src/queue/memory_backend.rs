//! In-memory queue transport.
//!
//! Single-process stand-in for the durable queue with the same lease
//! semantics: received messages are hidden for the visibility timeout and
//! reappear unless deleted with their current receipt handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use super::{parse_receipt, QueueError, QueueTransport, ReceivedMessage};

#[derive(Debug)]
struct Entry {
    id: String,
    body: String,
    visible_at: Instant,
    lease_token: Option<String>,
    receive_count: u32,
}

/// Counters exposed for tests and health output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryQueueStats {
    pub sent: u64,
    pub deleted: u64,
    pub stored: usize,
    pub in_flight: usize,
}

pub struct MemoryQueueTransport {
    entries: Mutex<Vec<Entry>>,
    arrivals: Notify,
    visibility_timeout: Duration,
    sent: AtomicU64,
    deleted: AtomicU64,
}

impl MemoryQueueTransport {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            arrivals: Notify::new(),
            visibility_timeout,
            sent: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
        }
    }

    /// Bodies of every message not yet deleted, in publish order.
    pub async fn bodies(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| e.body.clone())
            .collect()
    }

    pub async fn stats(&self) -> MemoryQueueStats {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        MemoryQueueStats {
            sent: self.sent.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            stored: entries.len(),
            in_flight: entries.iter().filter(|e| e.visible_at > now).count(),
        }
    }

    fn lease_visible(&self, entries: &mut [Entry], max_messages: usize) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let mut batch = Vec::new();
        for entry in entries.iter_mut().filter(|e| e.visible_at <= now) {
            if batch.len() >= max_messages {
                break;
            }
            let token = Uuid::new_v4().simple().to_string();
            entry.visible_at = now + self.visibility_timeout;
            entry.receive_count += 1;
            entry.lease_token = Some(token.clone());
            batch.push(ReceivedMessage {
                message_id: entry.id.clone(),
                body: entry.body.clone(),
                receipt_handle: format!("{}:{}", entry.id, token),
                receive_count: entry.receive_count,
            });
        }
        batch
    }
}

#[async_trait]
impl QueueTransport for MemoryQueueTransport {
    async fn send(&self, body: &str) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        self.entries.lock().await.push(Entry {
            id: id.clone(),
            body: body.to_string(),
            visible_at: Instant::now(),
            lease_token: None,
            receive_count: 0,
        });
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.arrivals.notify_waiters();
        Ok(id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);

            let next_visible = {
                let mut entries = self.entries.lock().await;
                let batch = self.lease_visible(&mut entries, max_messages.max(1));
                if !batch.is_empty() {
                    return Ok(batch);
                }
                // Register before releasing the lock so a concurrent send is not missed
                notified.as_mut().enable();
                entries.iter().map(|e| e.visible_at).min()
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = next_visible
                .map(|at| at.min(deadline))
                .unwrap_or(deadline);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let (message_id, token) = parse_receipt(receipt_handle)?;
        let mut entries = self.entries.lock().await;

        let position = entries
            .iter()
            .position(|e| e.id == message_id)
            .ok_or_else(|| QueueError::InvalidReceipt(receipt_handle.to_string()))?;

        if entries[position].lease_token.as_deref() != Some(token) {
            return Err(QueueError::LeaseExpired(receipt_handle.to_string()));
        }

        entries.remove(position);
        self.deleted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_send_receive_delete() {
        let queue = MemoryQueueTransport::new(Duration::from_secs(30));
        let id = queue.send(r#"{"taskId":"T1"}"#).await.unwrap();

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message_id, id);
        assert_eq!(batch[0].receive_count, 1);

        // Leased messages are hidden from other receivers
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());

        queue.delete(&batch[0].receipt_handle).await.unwrap();
        let stats = queue.stats().await;
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.stored, 0);
    }

    #[tokio::test]
    async fn test_delete_unknown_receipt_fails() {
        let queue = MemoryQueueTransport::new(Duration::from_secs(30));
        queue.send("body").await.unwrap();
        let batch = tokio_test::assert_ok!(queue.receive(1, Duration::ZERO).await);

        let err = tokio_test::assert_err!(queue.delete("missing:token").await);
        assert!(matches!(err, QueueError::InvalidReceipt(_)));
        tokio_test::assert_ok!(queue.delete(&batch[0].receipt_handle).await);
    }

    #[tokio::test]
    async fn test_respects_max_messages() {
        let queue = MemoryQueueTransport::new(Duration::from_secs(30));
        for i in 0..5 {
            queue.send(&format!("m{}", i)).await.unwrap();
        }
        let first = queue.receive(3, Duration::ZERO).await.unwrap();
        let bodies: Vec<&str> = first.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m0", "m1", "m2"]);
        assert_eq!(queue.receive(10, Duration::ZERO).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivered_after_visibility_timeout() {
        let queue = MemoryQueueTransport::new(Duration::from_secs(30));
        queue.send("body").await.unwrap();

        let first = queue.receive(1, Duration::ZERO).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        let second = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);
        assert_ne!(first[0].receipt_handle, second[0].receipt_handle);

        // The superseded receipt can no longer acknowledge
        assert!(matches!(
            queue.delete(&first[0].receipt_handle).await,
            Err(QueueError::LeaseExpired(_))
        ));
        queue.delete(&second[0].receipt_handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_send() {
        let queue = Arc::new(MemoryQueueTransport::new(Duration::from_secs(30)));
        let receiver = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(10, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.send("late").await.unwrap();

        let batch = receiver.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_times_out_empty() {
        let queue = MemoryQueueTransport::new(Duration::from_secs(30));
        let batch = queue.receive(10, Duration::from_secs(20)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_receipt() {
        let queue = MemoryQueueTransport::new(Duration::from_secs(30));
        assert!(matches!(
            queue.delete("missing:token").await,
            Err(QueueError::InvalidReceipt(_))
        ));
        assert!(matches!(
            queue.delete("garbage").await,
            Err(QueueError::InvalidReceipt(_))
        ));
    }
}
