use anyhow::{Context, Result};

use task_notification_service::config::Settings;
use task_notification_service::host::{self, RunMode};
use task_notification_service::telemetry::{init_telemetry, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("Failed to load configuration")?;
    let mode = RunMode::from_env(&settings.runtime)?;

    let format = match mode {
        RunMode::Listener => LogFormat::Text,
        RunMode::Function { .. } => LogFormat::Json,
    };
    let _telemetry = init_telemetry(&settings.otel, format)?;
    tracing::info!(mode = mode.as_str(), "Configuration loaded");

    host::run(settings, mode).await?;

    tracing::info!("Notification service stopped");
    Ok(())
}
