use async_trait::async_trait;
use bytes::Bytes;
use common::domain::DomainResult;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TrackedFuture;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Events a transport adapter delivers to the ingestion service.
#[derive(Debug)]
pub enum TransportEvent {
    /// Connection-time credential check; the transport waits on `respond_to`.
    Authenticate {
        client_id: Option<String>,
        username: Option<String>,
        password: Option<String>,
        respond_to: oneshot::Sender<bool>,
    },
    Connected {
        client_id: String,
    },
    Message {
        topic: String,
        payload: Bytes,
        client_id: Option<String>,
    },
    Disconnected {
        client_id: String,
    },
    /// The transport has shut down or asks the gateway to.
    Close,
}

pub type TransportEventSender = mpsc::Sender<TransportEvent>;
pub type TransportEventReceiver = mpsc::Receiver<TransportEvent>;

pub const TRANSPORT_EVENT_BUFFER: usize = 1024;

pub fn transport_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::channel(TRANSPORT_EVENT_BUFFER)
}

/// Stops the transport and resolves once it has confirmed the stop.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TransportControl: Send + Sync {
    async fn close(&self) -> DomainResult<()>;
}

/// Tracks the running transport adapters so shutdown can wait for them.
///
/// Adapters watch [`TransportSupervisor::token`]; closing cancels it and
/// waits for every tracked adapter future to finish.
#[derive(Clone)]
pub struct TransportSupervisor {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl TransportSupervisor {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            tracker: TaskTracker::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn track<F>(&self, future: F) -> TrackedFuture<F>
    where
        F: std::future::Future,
    {
        self.tracker.track_future(future)
    }

    pub fn active(&self) -> usize {
        self.tracker.len()
    }
}

#[async_trait]
impl TransportControl for TransportSupervisor {
    async fn close(&self) -> DomainResult<()> {
        debug!(active = self.tracker.len(), "closing transport adapters");
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        Ok(())
    }
}
