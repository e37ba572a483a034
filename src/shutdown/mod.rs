//! Signal handling and bounded drain of long-lived tasks.
//!
//! Listeners and the poll loop subscribe to one broadcast channel. On
//! SIGINT or SIGTERM the coordinator fires it, then waits up to the grace
//! period for every task to finish and aborts whatever is left.

use std::time::{Duration, Instant};

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Resolve when the process receives SIGINT or SIGTERM; returns the signal name.
pub async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Sleep for `duration`; returns true if shutdown fired first.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.recv() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

/// Outcome of [`ShutdownCoordinator::drain`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub completed: Vec<&'static str>,
    pub aborted: Vec<&'static str>,
    pub duration: Duration,
}

pub struct ShutdownCoordinator {
    tx: broadcast::Sender<()>,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx, grace }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Future that resolves once shutdown is triggered, for `with_graceful_shutdown`.
    pub fn signalled(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Trigger shutdown and wait for the named tasks within the grace period.
    pub async fn drain(&self, tasks: Vec<(&'static str, JoinHandle<()>)>) -> ShutdownReport {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.grace;
        let mut report = ShutdownReport::default();

        self.trigger();

        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.completed.push(name),
                Ok(Err(e)) => {
                    tracing::error!(task = name, error = %e, "Task ended abnormally");
                    report.completed.push(name);
                }
                Err(_) => {
                    tracing::warn!(task = name, "Grace period elapsed, aborting task");
                    handle.abort();
                    report.aborted.push(name);
                }
            }
        }

        report.duration = start.elapsed();
        tracing::info!(
            completed = ?report.completed,
            aborted = ?report.aborted,
            duration_ms = report.duration.as_millis() as u64,
            "Shutdown drain finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_waits_for_cooperative_tasks() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let mut rx = coordinator.subscribe();
        let handle = tokio::spawn(async move {
            let _ = rx.recv().await;
        });

        let report = coordinator.drain(vec![("worker", handle)]).await;
        assert_eq!(report.completed, vec!["worker"]);
        assert!(report.aborted.is_empty());
    }

    #[tokio::test]
    async fn test_drain_aborts_after_grace() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        let stuck = tokio::spawn(std::future::pending::<()>());
        let signalled = coordinator.signalled();
        let polite = tokio::spawn(signalled);

        let report = coordinator
            .drain(vec![("polite", polite), ("stuck", stuck)])
            .await;
        assert_eq!(report.completed, vec!["polite"]);
        assert_eq!(report.aborted, vec!["stuck"]);
    }
}
