//! Queue transport factory

use std::sync::Arc;

use crate::config::{QueueConfig, RedisConfig};
use crate::redis::RedisPool;

use super::memory_backend::MemoryQueueTransport;
use super::redis_backend::RedisQueueTransport;
use super::{QueueError, QueueTransport};

/// Create a queue transport based on configuration.
///
/// - `"redis"`: `RedisQueueTransport` against `queue.endpoint`, or `redis.url` when unset
/// - `"memory"` (default): `MemoryQueueTransport`
pub fn create_queue_transport(
    settings: &QueueConfig,
    redis: &RedisConfig,
) -> Result<Arc<dyn QueueTransport>, QueueError> {
    match settings.backend.as_str() {
        "redis" => {
            let pool = RedisPool::new(settings.transport_url(redis))?;
            tracing::info!(
                backend = "redis",
                queue = %settings.name,
                region = %settings.region,
                prefix = %settings.key_prefix,
                "Creating Redis queue transport"
            );
            Ok(Arc::new(RedisQueueTransport::new(Arc::new(pool), settings)))
        }
        "memory" => {
            tracing::info!(
                backend = "memory",
                queue = %settings.name,
                "Creating memory queue transport"
            );
            Ok(Arc::new(MemoryQueueTransport::new(
                settings.visibility_timeout(),
            )))
        }
        other => {
            tracing::warn!(
                backend = %other,
                "Unknown queue backend, falling back to memory"
            );
            Ok(Arc::new(MemoryQueueTransport::new(
                settings.visibility_timeout(),
            )))
        }
    }
}
