use crate::domain::TransportControl;
use common::domain::{DomainError, PlatformReporter};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Closed,
    /// The hard bound elapsed before the transport confirmed it stopped.
    ForcedTermination,
}

/// Drives `Running -> Draining -> Closed`.
///
/// Pipeline work is spawned through the controller so that draining can wait
/// for it; transports watch [`LifecycleController::accept_token`] to stop
/// taking new connections.
pub struct LifecycleController {
    state: watch::Sender<LifecycleState>,
    accept_token: CancellationToken,
    tasks: TaskTracker,
    shutdown_timeout: Duration,
    reporter: Arc<dyn PlatformReporter>,
}

impl LifecycleController {
    pub fn new(shutdown_timeout: Duration, reporter: Arc<dyn PlatformReporter>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Running);
        Self {
            state,
            accept_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
            shutdown_timeout,
            reporter,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Cancelled when draining starts.
    pub fn accept_token(&self) -> CancellationToken {
        self.accept_token.child_token()
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Spawns tracked pipeline work; refused once draining has begun.
    pub fn spawn<F>(&self, work: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.is_accepting() {
            return None;
        }
        Some(self.tasks.spawn(work))
    }

    /// Stops accepting, lets in-flight work finish, then closes the transport,
    /// all within the shutdown timeout.
    pub async fn shutdown(&self, transport: &dyn TransportControl) -> ShutdownOutcome {
        let started = self.state.send_if_modified(|state| {
            if *state == LifecycleState::Running {
                *state = LifecycleState::Draining;
                true
            } else {
                false
            }
        });

        if !started {
            return self.wait_closed().await;
        }

        info!(
            in_flight = self.tasks.len(),
            timeout_ms = self.shutdown_timeout.as_millis() as u64,
            "draining gateway"
        );
        self.accept_token.cancel();
        self.tasks.close();

        let drain = async {
            self.tasks.wait().await;
            let closed = AssertUnwindSafe(transport.close()).catch_unwind().await;
            match closed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "transport close failed");
                    self.reporter.handle_exception(&e).await;
                }
                Err(_) => {
                    let fault = DomainError::PipelineFault("transport close panicked".to_string());
                    self.reporter.handle_exception(&fault).await;
                }
            }
        };

        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            error!(
                in_flight = self.tasks.len(),
                "gateway did not close within {:?}, forcing termination",
                self.shutdown_timeout
            );
            return ShutdownOutcome::ForcedTermination;
        }

        self.state.send_replace(LifecycleState::Closed);
        info!("gateway closed");
        self.reporter.notify_close().await;
        ShutdownOutcome::Closed
    }

    async fn wait_closed(&self) -> ShutdownOutcome {
        let mut state = self.state.subscribe();
        let outcome = match tokio::time::timeout(
            self.shutdown_timeout,
            state.wait_for(|state| *state == LifecycleState::Closed),
        )
        .await
        {
            Ok(Ok(_)) => ShutdownOutcome::Closed,
            _ => ShutdownOutcome::ForcedTermination,
        };
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MockTransportControl;
    use common::domain::MockPlatformReporter;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn reporter_expecting_close() -> Arc<dyn PlatformReporter> {
        let mut reporter = MockPlatformReporter::new();
        reporter.expect_notify_close().times(1).returning(|| ());
        Arc::new(reporter)
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_before_closing_transport() {
        let controller = LifecycleController::new(Duration::from_secs(5), reporter_expecting_close());
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        controller
            .spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();

        let observed = finished.clone();
        let mut transport = MockTransportControl::new();
        transport.expect_close().times(1).returning(move || {
            assert!(observed.load(Ordering::SeqCst));
            Ok(())
        });

        let accept = controller.accept_token();
        let outcome = controller.shutdown(&transport).await;

        assert_eq!(outcome, ShutdownOutcome::Closed);
        assert_eq!(controller.state(), LifecycleState::Closed);
        assert!(accept.is_cancelled());
    }

    #[tokio::test]
    async fn test_draining_refuses_new_work() {
        let controller = LifecycleController::new(Duration::from_secs(5), reporter_expecting_close());
        let mut transport = MockTransportControl::new();
        transport.expect_close().returning(|| Ok(()));

        controller.shutdown(&transport).await;

        assert!(controller.spawn(async {}).is_none());
        assert!(!controller.is_accepting());
    }

    #[tokio::test]
    async fn test_transport_close_error_is_reported_and_still_closes() {
        let mut reporter = MockPlatformReporter::new();
        reporter
            .expect_handle_exception()
            .withf(|e: &DomainError| matches!(e, DomainError::TransportFatal(_)))
            .times(1)
            .returning(|_| ());
        reporter.expect_notify_close().times(1).returning(|| ());

        let controller = LifecycleController::new(Duration::from_secs(5), Arc::new(reporter));
        let mut transport = MockTransportControl::new();
        transport
            .expect_close()
            .returning(|| Err(DomainError::TransportFatal("socket already closed".to_string())));

        assert_eq!(controller.shutdown(&transport).await, ShutdownOutcome::Closed);
        assert_eq!(controller.state(), LifecycleState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_work_forces_termination() {
        let mut reporter = MockPlatformReporter::new();
        reporter.expect_notify_close().times(0);
        let controller = LifecycleController::new(Duration::from_millis(5000), Arc::new(reporter));

        controller
            .spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            })
            .unwrap();

        let mut transport = MockTransportControl::new();
        transport.expect_close().times(0);

        let outcome = controller.shutdown(&transport).await;

        assert_eq!(outcome, ShutdownOutcome::ForcedTermination);
        assert_eq!(controller.state(), LifecycleState::Draining);
    }

    #[tokio::test]
    async fn test_second_shutdown_waits_for_first() {
        let controller = Arc::new(LifecycleController::new(
            Duration::from_secs(5),
            reporter_expecting_close(),
        ));
        let mut transport = MockTransportControl::new();
        transport.expect_close().times(1).returning(|| Ok(()));

        controller.shutdown(&transport).await;
        let again = controller.shutdown(&transport).await;

        assert_eq!(again, ShutdownOutcome::Closed);
    }
}
