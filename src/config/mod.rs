mod settings;

pub use settings::{
    DatabaseConfig, DelayConfig, OtelConfig, QueueConfig, RedisConfig, RpcConfig, RuntimeConfig,
    ServerConfig, Settings,
};
