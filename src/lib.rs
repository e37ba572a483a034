// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
pub mod telemetry;

// Domain
pub mod events;
pub mod notification;
pub mod queue;
pub mod store;

// Entry points
pub mod host;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod triggers;
