use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

use crate::notification::{ChannelKind, NotificationRequest, NotificationService};

use super::pb::notification_service_server::{
    NotificationService as NotificationServiceRpc, NotificationServiceServer,
};
use super::pb::{NotificationType, SendNotificationRequest, SendNotificationResponse};

/// gRPC adapter over [`NotificationService`].
#[derive(Clone)]
pub struct NotificationRpc {
    service: Arc<NotificationService>,
}

impl NotificationRpc {
    pub fn new(service: Arc<NotificationService>) -> Self {
        Self { service }
    }

    pub fn into_server(self) -> NotificationServiceServer<Self> {
        NotificationServiceServer::new(self)
    }
}

/// Serve `SendNotification` on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    service: Arc<NotificationService>,
    shutdown: F,
) -> Result<(), tonic::transport::Error>
where
    F: Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "gRPC listening");
    }
    tonic::transport::Server::builder()
        .add_service(NotificationRpc::new(service).into_server())
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
}

/// Convert a wire request. Unknown enum values are kept as unmapped tokens.
pub fn request_from_proto(message: SendNotificationRequest) -> NotificationRequest {
    let mut kinds = Vec::new();
    let mut unmapped = Vec::new();
    for raw in message.types {
        match NotificationType::try_from(raw) {
            Ok(NotificationType::InApp) => kinds.push(ChannelKind::InApp),
            Ok(NotificationType::Email) => kinds.push(ChannelKind::Email),
            Err(_) => unmapped.push(raw.to_string()),
        }
    }
    let mut request = NotificationRequest::new(message.task_id, message.correlation_id, kinds);
    request.unmapped = unmapped;
    request
}

#[async_trait]
impl NotificationServiceRpc for NotificationRpc {
    #[tracing::instrument(name = "rpc.send_notification", skip(self, request))]
    async fn send_notification(
        &self,
        request: Request<SendNotificationRequest>,
    ) -> Result<Response<SendNotificationResponse>, Status> {
        let request = request_from_proto(request.into_inner());
        tracing::info!(
            task_id = %request.task_id,
            correlation_id = %request.correlation_id,
            types = ?request.types,
            "SendNotification received"
        );

        let ack = self.service.send_notification(request).await?;
        Ok(Response::new(SendNotificationResponse {
            ack: ack.to_string(),
        }))
    }
}
