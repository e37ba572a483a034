use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub delays: DelayConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// gRPC listener port
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,
    /// Health / metrics / audit HTTP port
    #[serde(default = "default_ops_port")]
    pub ops_port: u16,
    /// How long listeners may drain after the shutdown signal
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// "memory" or "postgres"
    #[serde(default = "default_database_backend")]
    pub backend: String,
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// "memory" or "redis"
    #[serde(default = "default_queue_backend")]
    pub backend: String,
    /// Queue identifier
    #[serde(default = "default_queue_name")]
    pub name: String,
    /// Deployment region, part of the queue key namespace
    #[serde(default = "default_queue_region")]
    pub region: String,
    /// Transport endpoint override (falls back to `redis.url`)
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_queue_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_seconds: u64,
    /// Long-poll wait per receive call
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u64,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// How often a long-poll re-checks the transport while waiting
    #[serde(default = "default_long_poll_interval")]
    pub long_poll_interval_ms: u64,
    /// Sleep after a cycle that returned zero messages
    #[serde(default = "default_idle_sleep")]
    pub idle_sleep_ms: u64,
    /// Hard bound on one receive call, on top of the long-poll wait
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_seconds: u64,
}

/// Relative emission offsets (seconds) for each pipeline step.
#[derive(Debug, Clone, Deserialize)]
pub struct DelayConfig {
    #[serde(default = "default_in_app_persisted")]
    pub in_app_persisted: u32,
    #[serde(default = "default_email_enqueued")]
    pub email_enqueued: u32,
    #[serde(default = "default_email_created")]
    pub email_created: u32,
    #[serde(default = "default_email_delivery_sent")]
    pub email_delivery_sent: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Upper bound on one outbound SendNotification call
    #[serde(default = "default_client_timeout")]
    pub client_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// "auto", "listener" or "function"
    #[serde(default = "default_runtime_mode")]
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_grpc_port() -> u16 {
    2000
}

fn default_ops_port() -> u16 {
    8080
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_database_backend() -> String {
    "memory".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost:5432/tasks".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    300
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_queue_backend() -> String {
    "memory".to_string()
}

fn default_queue_name() -> String {
    "email-notifications".to_string()
}

fn default_queue_region() -> String {
    "us-east-1".to_string()
}

fn default_queue_prefix() -> String {
    "queue".to_string()
}

fn default_visibility_timeout() -> u64 {
    30
}

fn default_wait_seconds() -> u64 {
    20
}

fn default_max_messages() -> usize {
    10
}

fn default_long_poll_interval() -> u64 {
    250
}

fn default_idle_sleep() -> u64 {
    1000
}

fn default_receive_timeout() -> u64 {
    30
}

fn default_in_app_persisted() -> u32 {
    6
}

fn default_email_enqueued() -> u32 {
    9
}

fn default_email_created() -> u32 {
    11
}

fn default_email_delivery_sent() -> u32 {
    14
}

fn default_client_timeout() -> u64 {
    5000
}

fn default_runtime_mode() -> String {
    "auto".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "task-notification-service".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // NOTIFY_SERVER__GRPC_PORT, NOTIFY_QUEUE__NAME, NOTIFY_DATABASE__URL, ...
            .add_source(
                Environment::with_prefix("NOTIFY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn grpc_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.grpc_port)
    }

    pub fn ops_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.ops_port)
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl QueueConfig {
    /// Endpoint the transport connects to.
    pub fn transport_url<'a>(&'a self, redis: &'a RedisConfig) -> &'a str {
        self.endpoint.as_deref().unwrap_or(redis.url.as_str())
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_seconds)
    }
}

impl RpcConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            queue: QueueConfig::default(),
            delays: DelayConfig::default(),
            rpc: RpcConfig::default(),
            runtime: RuntimeConfig::default(),
            otel: OtelConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            grpc_port: default_grpc_port(),
            ops_port: default_ops_port(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_database_backend(),
            url: default_database_url(),
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
            name: default_queue_name(),
            region: default_queue_region(),
            endpoint: None,
            key_prefix: default_queue_prefix(),
            visibility_timeout_seconds: default_visibility_timeout(),
            wait_seconds: default_wait_seconds(),
            max_messages: default_max_messages(),
            long_poll_interval_ms: default_long_poll_interval(),
            idle_sleep_ms: default_idle_sleep(),
            receive_timeout_seconds: default_receive_timeout(),
        }
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            in_app_persisted: default_in_app_persisted(),
            email_enqueued: default_email_enqueued(),
            email_created: default_email_created(),
            email_delivery_sent: default_email_delivery_sent(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            client_timeout_ms: default_client_timeout(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: default_runtime_mode(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.grpc_port, 2000);
        assert_eq!(settings.grpc_addr(), "0.0.0.0:2000");
        assert_eq!(settings.queue.max_messages, 10);
        assert_eq!(settings.queue.wait_seconds, 20);
        assert_eq!(settings.rpc.client_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_pipeline_delays_increase() {
        let delays = DelayConfig::default();
        assert!(delays.in_app_persisted < delays.email_enqueued);
        assert!(delays.email_enqueued < delays.email_created);
        assert!(delays.email_created < delays.email_delivery_sent);
    }

    #[test]
    fn test_transport_url_override() {
        let redis = RedisConfig::default();
        let mut queue = QueueConfig::default();
        assert_eq!(queue.transport_url(&redis), "redis://localhost:6379");

        queue.endpoint = Some("redis://queue-host:6380".to_string());
        assert_eq!(queue.transport_url(&redis), "redis://queue-host:6380");
    }

    #[test]
    fn test_deserialize_partial_source() {
        let settings: Settings = Config::builder()
            .set_override("queue.name", "custom-queue")
            .unwrap()
            .set_override("delays.email_enqueued", 3)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.queue.name, "custom-queue");
        assert_eq!(settings.delays.email_enqueued, 3);
        assert_eq!(settings.delays.in_app_persisted, 6);
        assert_eq!(settings.database.backend, "memory");
    }
}
