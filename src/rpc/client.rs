use std::time::Duration;

use thiserror::Error;
use tonic::transport::{Channel, Endpoint};

use crate::config::RpcConfig;
use crate::notification::ChannelKind;

use super::pb::notification_service_client::NotificationServiceClient;
use super::pb::{NotificationType, SendNotificationRequest};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid endpoint: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("SendNotification failed: {0}")]
    Status(#[from] tonic::Status),

    #[error("SendNotification timed out after {0:?}")]
    Timeout(Duration),
}

/// Caller side of `SendNotification` with a per-call deadline.
#[derive(Clone)]
pub struct NotificationClient {
    inner: NotificationServiceClient<Channel>,
    timeout: Duration,
}

impl NotificationClient {
    /// Build a client without connecting; the channel connects on first use.
    pub fn connect_lazy(endpoint: &str, config: &RpcConfig) -> Result<Self, ClientError> {
        let channel = Endpoint::from_shared(endpoint.to_string())?.connect_lazy();
        Ok(Self {
            inner: NotificationServiceClient::new(channel),
            timeout: config.client_timeout(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[tracing::instrument(name = "rpc_client.send_notification", skip(self, types))]
    pub async fn send_notification(
        &self,
        task_id: &str,
        correlation_id: &str,
        types: &[ChannelKind],
    ) -> Result<String, ClientError> {
        let request = SendNotificationRequest {
            task_id: task_id.to_string(),
            types: types
                .iter()
                .map(|kind| match kind {
                    ChannelKind::InApp => NotificationType::InApp as i32,
                    ChannelKind::Email => NotificationType::Email as i32,
                })
                .collect(),
            correlation_id: correlation_id.to_string(),
        };

        let mut client = self.inner.clone();
        let response = tokio::time::timeout(self.timeout, client.send_notification(request))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))??;

        Ok(response.into_inner().ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_lazy_uses_configured_timeout() {
        let client = NotificationClient::connect_lazy(
            "http://127.0.0.1:2000",
            &RpcConfig {
                client_timeout_ms: 250,
            },
        )
        .unwrap();
        assert_eq!(client.timeout(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_invalid_endpoint() {
        let result = NotificationClient::connect_lazy("not a uri", &RpcConfig::default());
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }
}
