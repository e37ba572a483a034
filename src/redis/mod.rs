//! Redis connectivity shared by the Redis-backed queue transport.

mod pool;

pub use pool::{PoolError, RedisPool};
