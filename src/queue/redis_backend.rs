//! Redis-backed queue transport.
//!
//! Layout under `{prefix}:{region}:{queue}`:
//! - `:visible`  ZSET of message ids scored by visible-at (unix millis)
//! - `:bodies`   HASH id -> body
//! - `:receipts` HASH id -> current receipt handle
//! - `:receives` HASH id -> receive count
//!
//! Leasing and acknowledgement run as Lua scripts so each is atomic on the
//! server. Long polling re-runs the lease script until a message shows up or
//! the wait elapses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::Script;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::redis::RedisPool;

use super::{parse_receipt, QueueError, QueueTransport, ReceivedMessage};

/// ARGV: now_ms, visibility_ms, max, lease_token
const RECEIVE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[3]))
local leased_until = tonumber(ARGV[1]) + tonumber(ARGV[2])
local out = {}
for i, id in ipairs(ids) do
  local body = redis.call('HGET', KEYS[2], id)
  if body then
    local receipt = id .. ':' .. ARGV[4] .. '-' .. i
    redis.call('ZADD', KEYS[1], leased_until, id)
    redis.call('HSET', KEYS[3], id, receipt)
    local count = redis.call('HINCRBY', KEYS[4], id, 1)
    table.insert(out, id)
    table.insert(out, body)
    table.insert(out, receipt)
    table.insert(out, tostring(count))
  else
    redis.call('ZREM', KEYS[1], id)
  end
end
return out
"#;

/// ARGV: message_id, receipt. Returns 1 deleted, 0 superseded lease, -1 unknown.
const DELETE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[3], ARGV[1])
if not current then
  return -1
end
if current ~= ARGV[2] then
  return 0
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
return 1
"#;

/// Key names for one queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RedisQueueKeys {
    pub visible: String,
    pub bodies: String,
    pub receipts: String,
    pub receives: String,
}

impl RedisQueueKeys {
    pub fn new(prefix: &str, region: &str, queue: &str) -> Self {
        let base = format!("{}:{}:{}", prefix, region, queue);
        Self {
            visible: format!("{}:visible", base),
            bodies: format!("{}:bodies", base),
            receipts: format!("{}:receipts", base),
            receives: format!("{}:receives", base),
        }
    }
}

pub struct RedisQueueTransport {
    pool: Arc<RedisPool>,
    keys: RedisQueueKeys,
    visibility_timeout: Duration,
    poll_interval: Duration,
    receive_script: Script,
    delete_script: Script,
}

impl RedisQueueTransport {
    pub fn new(pool: Arc<RedisPool>, config: &QueueConfig) -> Self {
        Self {
            pool,
            keys: RedisQueueKeys::new(&config.key_prefix, &config.region, &config.name),
            visibility_timeout: config.visibility_timeout(),
            poll_interval: Duration::from_millis(config.long_poll_interval_ms.max(10)),
            receive_script: Script::new(RECEIVE_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
        }
    }

    pub fn keys(&self) -> &RedisQueueKeys {
        &self.keys
    }

    /// One non-blocking lease attempt.
    async fn lease(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let now_ms = Utc::now().timestamp_millis();
        let visibility_ms = self.visibility_timeout.as_millis() as i64;
        let token = Uuid::new_v4().simple().to_string();
        let keys = &self.keys;
        let script = &self.receive_script;

        let raw: Vec<String> = self
            .pool
            .execute(|mut conn| async move {
                let mut invocation = script.prepare_invoke();
                invocation
                    .key(&keys.visible)
                    .key(&keys.bodies)
                    .key(&keys.receipts)
                    .key(&keys.receives)
                    .arg(now_ms)
                    .arg(visibility_ms)
                    .arg(max_messages)
                    .arg(token.as_str());
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        Ok(decode_leased(raw))
    }
}

/// Lease script output is a flat list of (id, body, receipt, count) tuples.
fn decode_leased(raw: Vec<String>) -> Vec<ReceivedMessage> {
    raw.chunks_exact(4)
        .map(|chunk| ReceivedMessage {
            message_id: chunk[0].clone(),
            body: chunk[1].clone(),
            receipt_handle: chunk[2].clone(),
            receive_count: chunk[3].parse().unwrap_or(1),
        })
        .collect()
}

#[async_trait]
impl QueueTransport for RedisQueueTransport {
    async fn send(&self, body: &str) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        let now_ms = Utc::now().timestamp_millis();
        let keys = &self.keys;
        let message_id = id.as_str();

        self.pool
            .execute(|mut conn| async move {
                let result: redis::RedisResult<()> = redis::pipe()
                    .atomic()
                    .hset(&keys.bodies, message_id, body)
                    .ignore()
                    .zadd(&keys.visible, message_id, now_ms)
                    .ignore()
                    .query_async(&mut conn)
                    .await;
                result
            })
            .await?;

        tracing::debug!(message_id = %id, queue = %self.keys.visible, "Message published");
        Ok(id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let batch = self.lease(max_messages.max(1)).await?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let (message_id, _) = parse_receipt(receipt_handle)?;
        let keys = &self.keys;
        let script = &self.delete_script;

        let outcome: i64 = self
            .pool
            .execute(|mut conn| async move {
                let mut invocation = script.prepare_invoke();
                invocation
                    .key(&keys.visible)
                    .key(&keys.bodies)
                    .key(&keys.receipts)
                    .key(&keys.receives)
                    .arg(message_id)
                    .arg(receipt_handle);
                invocation.invoke_async(&mut conn).await
            })
            .await?;

        match outcome {
            1 => Ok(()),
            0 => Err(QueueError::LeaseExpired(receipt_handle.to_string())),
            _ => Err(QueueError::InvalidReceipt(receipt_handle.to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
