//! Process hosting: pick a mode, wire the service, run until shutdown.

use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{RuntimeConfig, Settings};
use crate::notification::NotificationService;
use crate::queue::{
    create_queue_transport, ConsumerConfig, MessageHandler, QueueConsumer, QueueError,
    QueueTransport,
};
use crate::rpc;
use crate::server::{self, AppState};
use crate::shutdown::{wait_for_signal, ShutdownCoordinator};
use crate::store::{create_stores, StoreError};
use crate::triggers::{FunctionHost, FunctionTrigger, RuntimeApiClient};

/// Set by function runtimes; its presence selects function mode under `auto`.
pub const RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Invalid runtime mode '{0}' (expected auto, listener or function)")]
    InvalidMode(String),

    #[error("Function mode requires AWS_LAMBDA_RUNTIME_API")]
    MissingRuntimeApi,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// gRPC and ops listeners plus the background queue consumer.
    Listener,
    /// One event per invocation from the runtime API at the given address.
    Function { runtime_api: String },
}

impl RunMode {
    pub fn resolve(config: &RuntimeConfig, runtime_api: Option<String>) -> Result<Self, HostError> {
        let runtime_api = runtime_api.filter(|api| !api.trim().is_empty());
        match config.mode.to_ascii_lowercase().as_str() {
            "listener" => Ok(RunMode::Listener),
            "function" => runtime_api
                .map(|runtime_api| RunMode::Function { runtime_api })
                .ok_or(HostError::MissingRuntimeApi),
            "auto" => Ok(match runtime_api {
                Some(runtime_api) => RunMode::Function { runtime_api },
                None => RunMode::Listener,
            }),
            other => Err(HostError::InvalidMode(other.to_string())),
        }
    }

    pub fn from_env(config: &RuntimeConfig) -> Result<Self, HostError> {
        Self::resolve(config, std::env::var(RUNTIME_API_ENV).ok())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Listener => "listener",
            RunMode::Function { .. } => "function",
        }
    }
}

/// Shared components built once at startup.
pub struct Components {
    pub service: Arc<NotificationService>,
    pub queue: Arc<dyn QueueTransport>,
}

impl Components {
    pub async fn build(settings: &Settings) -> Result<Self, HostError> {
        let stores = create_stores(&settings.database).await?;
        let queue = create_queue_transport(&settings.queue, &settings.redis)?;
        let service = Arc::new(NotificationService::build(
            &stores,
            queue.clone(),
            &settings.delays,
        ));
        Ok(Self { service, queue })
    }
}

pub async fn run(settings: Settings, mode: RunMode) -> Result<(), HostError> {
    let components = Components::build(&settings).await?;
    tracing::info!(
        mode = mode.as_str(),
        queue_backend = %settings.queue.backend,
        database_backend = %settings.database.backend,
        "Notification service starting"
    );

    match mode {
        RunMode::Listener => run_listener(Arc::new(settings), components).await,
        RunMode::Function { runtime_api } => run_function(&settings, components, &runtime_api).await,
    }
}

async fn run_listener(settings: Arc<Settings>, components: Components) -> Result<(), HostError> {
    let coordinator = ShutdownCoordinator::new(settings.server.shutdown_grace());

    let grpc_listener = TcpListener::bind(settings.grpc_addr()).await?;
    let ops_listener = TcpListener::bind(settings.ops_addr()).await?;

    let grpc_handle = {
        let service = components.service.clone();
        let shutdown = coordinator.signalled();
        tokio::spawn(async move {
            if let Err(e) = rpc::serve(grpc_listener, service, shutdown).await {
                tracing::error!(error = %e, "gRPC server failed");
            }
        })
    };

    let ops_handle = {
        let state = AppState::new(settings.clone(), components.service.clone(), "listener");
        let shutdown = coordinator.signalled();
        tokio::spawn(async move {
            if let Err(e) = server::serve(ops_listener, state, shutdown).await {
                tracing::error!(error = %e, "Ops HTTP server failed");
            }
        })
    };

    let consumer_handle = {
        let handler: Arc<dyn MessageHandler> = components.service.clone();
        let consumer = QueueConsumer::new(
            components.queue.clone(),
            handler,
            ConsumerConfig::from(&settings.queue),
        );
        let shutdown = coordinator.subscribe();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    let signal = wait_for_signal().await;
    tracing::info!(signal, "Shutdown requested");

    coordinator
        .drain(vec![
            ("consumer", consumer_handle),
            ("grpc", grpc_handle),
            ("ops", ops_handle),
        ])
        .await;
    Ok(())
}

async fn run_function(
    settings: &Settings,
    components: Components,
    runtime_api: &str,
) -> Result<(), HostError> {
    let coordinator = ShutdownCoordinator::new(settings.server.shutdown_grace());
    let host = FunctionHost::new(
        RuntimeApiClient::new(runtime_api),
        FunctionTrigger::new(components.service),
    );

    let shutdown = coordinator.subscribe();
    let host_handle = tokio::spawn(async move { host.run(shutdown).await });

    let signal = wait_for_signal().await;
    tracing::info!(signal, "Shutdown requested");

    coordinator.drain(vec![("function_host", host_handle)]).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(mode: &str) -> RuntimeConfig {
        RuntimeConfig {
            mode: mode.to_string(),
        }
    }

    #[test]
    fn test_auto_mode_detects_runtime_api() {
        assert_eq!(
            RunMode::resolve(&runtime("auto"), Some("127.0.0.1:9001".into())).unwrap(),
            RunMode::Function {
                runtime_api: "127.0.0.1:9001".into()
            }
        );
        assert_eq!(
            RunMode::resolve(&runtime("auto"), None).unwrap(),
            RunMode::Listener
        );
        assert_eq!(
            RunMode::resolve(&runtime("auto"), Some("  ".into())).unwrap(),
            RunMode::Listener
        );
    }

    #[test]
    fn test_explicit_modes() {
        assert_eq!(
            RunMode::resolve(&runtime("LISTENER"), Some("x:1".into())).unwrap(),
            RunMode::Listener
        );
        assert!(matches!(
            RunMode::resolve(&runtime("function"), None),
            Err(HostError::MissingRuntimeApi)
        ));
        assert!(matches!(
            RunMode::resolve(&runtime("batch"), None),
            Err(HostError::InvalidMode(_))
        ));
    }

    #[tokio::test]
    async fn test_components_build_with_memory_backends() {
        let settings = Settings::default();
        let components = Components::build(&settings).await.unwrap();
        assert_eq!(components.queue.backend_name(), "memory");
        assert_eq!(components.service.router().channel_kinds().len(), 2);
    }
}
