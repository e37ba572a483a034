use std::time::Instant;

use futures::FutureExt;

use crate::error::NotifyError;
use crate::metrics::DispatchMetrics;

use super::email::EmailChannel;
use super::in_app::InAppChannel;
use super::join::{join_branches, Branch};
use super::types::{ChannelKind, NotificationRequest};

/// The closed set of notification strategies.
pub enum Channel {
    InApp(InAppChannel),
    Email(EmailChannel),
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::InApp(_) => ChannelKind::InApp,
            Channel::Email(_) => ChannelKind::Email,
        }
    }

    pub fn can_process(&self, types: &[ChannelKind]) -> bool {
        types.contains(&self.kind())
    }

    pub async fn process(
        &self,
        task_id: &str,
        correlation_id: &str,
        _types: &[ChannelKind],
    ) -> Result<(), NotifyError> {
        match self {
            Channel::InApp(channel) => channel.handle(task_id, correlation_id).await,
            Channel::Email(channel) => channel.handle(task_id, correlation_id).await,
        }
    }
}

/// Fans a request out to every registered channel whose capability matches.
pub struct NotificationRouter {
    channels: Vec<Channel>,
}

impl NotificationRouter {
    /// Channels are evaluated in the order given here.
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    pub fn channel_kinds(&self) -> Vec<ChannelKind> {
        self.channels.iter().map(Channel::kind).collect()
    }

    #[tracing::instrument(
        name = "router.dispatch",
        skip(self, request),
        fields(
            task_id = %request.task_id,
            correlation_id = %request.correlation_id,
            types = ?request.types,
        )
    )]
    pub async fn dispatch(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        let started = Instant::now();
        let result = self.fan_out(request).await;

        let outcome = match &result {
            Ok(()) => "ok",
            Err(e) => e.class().as_str(),
        };
        DispatchMetrics::record_dispatch(outcome, started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            tracing::warn!(error = %e, class = outcome, "Notification dispatch failed");
        }
        result
    }

    async fn fan_out(&self, request: &NotificationRequest) -> Result<(), NotifyError> {
        if !request.unmapped.is_empty() {
            if request.types.is_empty() {
                tracing::warn!(
                    unmapped = ?request.unmapped,
                    "No requested type maps to a known channel"
                );
            } else {
                tracing::debug!(unmapped = ?request.unmapped, "Ignoring unknown types");
            }
        }

        let matching: Vec<&Channel> = self
            .channels
            .iter()
            .filter(|c| c.can_process(&request.types))
            .collect();

        if matching.is_empty() {
            return Err(NotifyError::NoHandler {
                requested: request.requested_tokens(),
            });
        }

        let branches: Vec<Branch> = matching
            .into_iter()
            .map(|channel| {
                let label = channel.kind().as_str();
                let work = async move {
                    let result = channel
                        .process(&request.task_id, &request.correlation_id, &request.types)
                        .await;
                    DispatchMetrics::record_channel(label, result.is_ok());
                    result
                }
                .boxed();
                (label.to_string(), work)
            })
            .collect();

        join_branches("dispatch", branches).await
    }
}
