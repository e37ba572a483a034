//! gRPC surface: `api.NotificationService/SendNotification`.

mod client;
mod server;

/// Bindings generated from `proto/notifications.proto`.
pub mod pb {
    tonic::include_proto!("api");
}

pub use client::{ClientError, NotificationClient};
pub use pb::notification_service_server::NotificationServiceServer;
pub use server::{request_from_proto, serve, NotificationRpc};
