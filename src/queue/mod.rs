//! Durable, lease-based message queue for email delivery.
//!
//! A message becomes invisible to other consumers once received and stays
//! leased for the visibility timeout. It is removed only when the holder of
//! the current receipt handle deletes it; otherwise it becomes visible again
//! and is redelivered (at-least-once).
//!
//! Backends:
//! - `memory`: single-process queue for tests and local runs
//! - `redis`: sorted-set + hash layout with Lua scripts for atomic lease/ack

mod backoff;
mod consumer;
mod factory;
mod memory_backend;
mod redis_backend;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use consumer::{ConsumerConfig, CycleReport, QueueConsumer};
pub use factory::create_queue_transport;
pub use memory_backend::{MemoryQueueStats, MemoryQueueTransport};
pub use redis_backend::{RedisQueueTransport, RedisQueueKeys};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::NotifyError;
use crate::redis::PoolError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Lease expired for receipt: {0}")]
    LeaseExpired(String),

    #[error("Queue operation timed out")]
    Timeout,
}

impl From<PoolError> for QueueError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Redis(e) => QueueError::Redis(e),
        }
    }
}

/// A message leased to one consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: String,
    /// Opaque lease token; only the latest one can delete the message
    pub receipt_handle: String,
    /// How many times the message has been received, this one included
    pub receive_count: u32,
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Publish a body, returning the new message id.
    async fn send(&self, body: &str) -> Result<String, QueueError>;

    /// Lease up to `max_messages`, waiting at most `wait` for the first one.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Acknowledge a message through its current receipt handle.
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Backend name for logs and health output
    fn backend_name(&self) -> &'static str;
}

/// Handles one dequeued message body. `Ok` acknowledges the message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &str) -> Result<(), NotifyError>;
}

/// Split a receipt handle into `(message_id, lease_token)`.
pub(crate) fn parse_receipt(receipt_handle: &str) -> Result<(&str, &str), QueueError> {
    match receipt_handle.rsplit_once(':') {
        Some((id, token)) if !id.is_empty() && !token.is_empty() => Ok((id, token)),
        _ => Err(QueueError::InvalidReceipt(receipt_handle.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_receipt() {
        assert_eq!(parse_receipt("msg-1:abc").unwrap(), ("msg-1", "abc"));
        assert!(matches!(
            parse_receipt("no-token"),
            Err(QueueError::InvalidReceipt(_))
        ));
        assert!(parse_receipt("msg-1:").is_err());
        assert!(parse_receipt(":abc").is_err());
    }
}
