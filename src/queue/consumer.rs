//! Long-running queue poller.
//!
//! Each cycle leases a batch, runs the handler on every message in turn and
//! deletes the ones that succeeded. Failed messages are left alone so the
//! transport redelivers them after the visibility timeout. Shutdown is only
//! observed between cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::QueueConfig;
use crate::metrics::QueueMetrics;
use crate::shutdown::sleep_or_shutdown;

use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::{MessageHandler, QueueError, QueueTransport, ReceivedMessage};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub max_messages: usize,
    /// Long-poll wait handed to the transport
    pub wait: Duration,
    /// Hard bound on one receive call
    pub receive_timeout: Duration,
    /// Pause after a cycle without messages
    pub idle_sleep: Duration,
    pub backoff: BackoffConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

/// Slack a receive call gets on top of its long-poll wait.
pub const RECEIVE_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

impl From<&QueueConfig> for ConsumerConfig {
    fn from(config: &QueueConfig) -> Self {
        let wait = config.wait();
        let configured = Duration::from_secs(config.receive_timeout_seconds);
        // A bound at or below the wait would time out every idle long poll
        let floor = wait + RECEIVE_TIMEOUT_MARGIN;
        let receive_timeout = if configured < floor {
            tracing::warn!(
                receive_timeout_secs = configured.as_secs(),
                wait_secs = wait.as_secs(),
                using_secs = floor.as_secs(),
                "Receive timeout shorter than long-poll wait, raising it"
            );
            floor
        } else {
            configured
        };

        Self {
            max_messages: config.max_messages,
            wait,
            receive_timeout,
            idle_sleep: Duration::from_millis(config.idle_sleep_ms),
            backoff: BackoffConfig::default(),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub received: usize,
    pub acked: usize,
    pub handler_failures: usize,
    pub delete_failures: usize,
}

pub struct QueueConsumer {
    transport: Arc<dyn QueueTransport>,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
}

impl QueueConsumer {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            transport,
            handler,
            config,
        }
    }

    /// Poll until the shutdown signal fires (or its sender is dropped).
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut backoff = ExponentialBackoff::with_config(self.config.backoff.clone());

        tracing::info!(
            backend = self.transport.backend_name(),
            max_messages = self.config.max_messages,
            wait_secs = self.config.wait.as_secs(),
            "Queue consumer started"
        );

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                result = self.receive() => result,
            };

            match received {
                Ok(messages) if messages.is_empty() => {
                    backoff.reset();
                    if sleep_or_shutdown(self.config.idle_sleep, &mut shutdown).await {
                        break;
                    }
                }
                Ok(messages) => {
                    backoff.reset();
                    let report = self.process_batch(messages).await;
                    tracing::debug!(
                        received = report.received,
                        acked = report.acked,
                        handler_failures = report.handler_failures,
                        "Queue cycle finished"
                    );
                }
                Err(e) => {
                    QueueMetrics::record_receive_error();
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Queue receive failed"
                    );
                    if sleep_or_shutdown(delay, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Queue consumer stopped");
    }

    /// One receive + process cycle without any sleeping.
    pub async fn poll_once(&self) -> Result<CycleReport, QueueError> {
        let messages = self.receive().await?;
        Ok(self.process_batch(messages).await)
    }

    async fn receive(&self) -> Result<Vec<ReceivedMessage>, QueueError> {
        let receive = self
            .transport
            .receive(self.config.max_messages, self.config.wait);
        match tokio::time::timeout(self.config.receive_timeout, receive).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout),
        }
    }

    /// Handle messages sequentially; delete exactly the ones that succeeded.
    pub async fn process_batch(&self, messages: Vec<ReceivedMessage>) -> CycleReport {
        let mut report = CycleReport {
            received: messages.len(),
            ..Default::default()
        };
        QueueMetrics::record_received(messages.len() as u64);

        for message in messages {
            if message.receive_count > 1 {
                QueueMetrics::record_redelivered();
            }

            let span = tracing::info_span!(
                "queue.message",
                message_id = %message.message_id,
                receive_count = message.receive_count,
            );
            match self.process_message(&message).instrument(span).await {
                MessageOutcome::Acked => report.acked += 1,
                MessageOutcome::HandlerFailed => report.handler_failures += 1,
                MessageOutcome::DeleteFailed => report.delete_failures += 1,
            }
        }

        report
    }

    async fn process_message(&self, message: &ReceivedMessage) -> MessageOutcome {
        if let Err(e) = self.handler.handle(&message.body).await {
            QueueMetrics::record_handler_failure();
            tracing::warn!(
                error = %e,
                class = e.class().as_str(),
                "Message handler failed, leaving message for redelivery"
            );
            return MessageOutcome::HandlerFailed;
        }

        match self.transport.delete(&message.receipt_handle).await {
            Ok(()) => {
                QueueMetrics::record_acked();
                MessageOutcome::Acked
            }
            Err(e) => {
                // Handler already ran; the message may come back and run again
                QueueMetrics::record_delete_failure();
                tracing::error!(error = %e, "Failed to delete handled message");
                MessageOutcome::DeleteFailed
            }
        }
    }
}

enum MessageOutcome {
    Acked,
    HandlerFailed,
    DeleteFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyError;
    use crate::metrics::{QUEUE_DELETE_FAILURES_TOTAL, QUEUE_RECEIVE_ERRORS_TOTAL};
    use crate::queue::MemoryQueueTransport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Errors on the first `failing_receives` receives, then hands out a
    /// single message once. Every delete fails.
    struct FlakyQueue {
        failing_receives: usize,
        receives: AtomicUsize,
        served: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl FlakyQueue {
        fn new(failing_receives: usize) -> Self {
            Self {
                failing_receives,
                receives: AtomicUsize::new(0),
                served: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QueueTransport for FlakyQueue {
        async fn send(&self, _body: &str) -> Result<String, QueueError> {
            Ok("m1".to_string())
        }

        async fn receive(
            &self,
            _max_messages: usize,
            _wait: Duration,
        ) -> Result<Vec<ReceivedMessage>, QueueError> {
            let n = self.receives.fetch_add(1, Ordering::SeqCst);
            if n < self.failing_receives {
                return Err(QueueError::Unavailable("connection reset".into()));
            }
            if self.served.fetch_add(1, Ordering::SeqCst) > 0 {
                return Ok(Vec::new());
            }
            Ok(vec![ReceivedMessage {
                message_id: "m1".to_string(),
                body: "good".to_string(),
                receipt_handle: "m1:lease".to_string(),
                receive_count: 1,
            }])
        }

        async fn delete(&self, _receipt_handle: &str) -> Result<(), QueueError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::Unavailable("connection reset".into()))
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    /// Fails every body equal to "bad"
    #[derive(Default)]
    struct PickyHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for PickyHandler {
        async fn handle(&self, body: &str) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if body == "bad" {
                Err(NotifyError::Validation("bad body".into()))
            } else {
                Ok(())
            }
        }
    }

    fn test_config() -> ConsumerConfig {
        ConsumerConfig {
            max_messages: 10,
            wait: Duration::ZERO,
            receive_timeout: Duration::from_secs(1),
            idle_sleep: Duration::from_millis(10),
            backoff: BackoffConfig::default(),
        }
    }

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn test_poll_once_deletes_only_successes() {
        let transport = Arc::new(MemoryQueueTransport::new(Duration::from_secs(30)));
        transport.send("good").await.unwrap();
        transport.send("bad").await.unwrap();
        let handler = Arc::new(PickyHandler::default());
        let consumer = QueueConsumer::new(transport.clone(), handler.clone(), test_config());

        let report = consumer.poll_once().await.unwrap();
        assert_eq!(
            report,
            CycleReport {
                received: 2,
                acked: 1,
                handler_failures: 1,
                delete_failures: 0,
            }
        );
        assert_eq!(transport.bodies().await, vec!["bad".to_string()]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let transport = Arc::new(MemoryQueueTransport::new(Duration::from_secs(30)));
        let handler = Arc::new(PickyHandler::default());
        let consumer = Arc::new(QueueConsumer::new(transport.clone(), handler.clone(), test_config()));
        let (tx, rx) = broadcast::channel(1);

        let task = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.run(rx).await })
        };

        transport.send("good").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("consumer did not stop")
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(transport.bodies().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let transport = Arc::new(MemoryQueueTransport::new(Duration::from_secs(30)));
        let consumer = QueueConsumer::new(transport, Arc::new(PickyHandler::default()), test_config());
        let (tx, rx) = broadcast::channel::<()>(1);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), consumer.run(rx))
            .await
            .expect("consumer did not stop");
    }

    #[tokio::test]
    async fn test_run_retries_after_receive_errors() {
        let transport = Arc::new(FlakyQueue::new(2));
        let handler = Arc::new(PickyHandler::default());
        let config = ConsumerConfig {
            backoff: fast_backoff(),
            ..test_config()
        };
        let consumer = QueueConsumer::new(transport.clone(), handler.clone(), config);
        let errors_before = QUEUE_RECEIVE_ERRORS_TOTAL.get();
        let (tx, rx) = broadcast::channel(1);

        let task = tokio::spawn(async move { consumer.run(rx).await });
        tokio::time::timeout(Duration::from_secs(2), async {
            while handler.calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("consumer gave up after receive errors");

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("consumer did not stop")
            .unwrap();

        assert!(transport.receives.load(Ordering::SeqCst) >= 3);
        assert!(QUEUE_RECEIVE_ERRORS_TOTAL.get() >= errors_before + 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_is_counted_and_not_rehandled() {
        let transport = Arc::new(FlakyQueue::new(0));
        let handler = Arc::new(PickyHandler::default());
        let consumer = QueueConsumer::new(transport.clone(), handler.clone(), test_config());
        let failures_before = QUEUE_DELETE_FAILURES_TOTAL.get();

        let report = consumer.poll_once().await.unwrap();
        assert_eq!(
            report,
            CycleReport {
                received: 1,
                acked: 0,
                handler_failures: 0,
                delete_failures: 1,
            }
        );

        // The next cycle finds nothing and the handler is not re-run
        let report = consumer.poll_once().await.unwrap();
        assert_eq!(report, CycleReport::default());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.deletes.load(Ordering::SeqCst), 1);
        assert!(QUEUE_DELETE_FAILURES_TOTAL.get() > failures_before);
    }

    #[test]
    fn test_receive_timeout_raised_above_wait() {
        let queue = QueueConfig {
            wait_seconds: 20,
            receive_timeout_seconds: 10,
            ..QueueConfig::default()
        };
        let config = ConsumerConfig::from(&queue);
        assert_eq!(config.receive_timeout, Duration::from_secs(25));

        let queue = QueueConfig {
            wait_seconds: 5,
            receive_timeout_seconds: 60,
            ..QueueConfig::default()
        };
        assert_eq!(
            ConsumerConfig::from(&queue).receive_timeout,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_config_from_queue_settings() {
        let config = ConsumerConfig::from(&QueueConfig::default());
        assert_eq!(config.max_messages, 10);
        assert_eq!(config.wait, Duration::from_secs(20));
        assert_eq!(config.receive_timeout, Duration::from_secs(30));
    }
}
