use crate::domain::{
    DeviceRegistry, ForwardAck, Forwarder, LifecycleController, MeshliumGatewayConfig,
    MessageValidator, Resolution, Session, SessionAuthenticator, ShutdownOutcome, StateReconciler,
    TransportControl, TransportEvent, TransportEventReceiver,
};
use bytes::Bytes;
use common::domain::{
    DomainError, DomainResult, LogRecord, PlatformReporter, ReadingProducer, ValidatedReading,
};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, info_span, warn, Instrument, Span};

/// Validate, resolve, reconcile and forward for a single message.
#[derive(Clone)]
pub struct IngestionPipeline {
    validator: Arc<MessageValidator>,
    registry: Arc<DeviceRegistry>,
    reconciler: Arc<StateReconciler>,
    forwarder: Arc<Forwarder>,
    reporter: Arc<dyn PlatformReporter>,
}

impl IngestionPipeline {
    pub fn new(
        validator: MessageValidator,
        registry: Arc<DeviceRegistry>,
        forwarder: Arc<Forwarder>,
        reporter: Arc<dyn PlatformReporter>,
    ) -> Self {
        Self {
            validator: Arc::new(validator),
            reconciler: Arc::new(StateReconciler::new(Arc::clone(&registry))),
            registry,
            forwarder,
            reporter,
        }
    }

    /// Runs the stages inside their own failure boundary; any error or panic
    /// is reported and never escapes.
    pub async fn process(&self, topic: String, payload: Bytes, client_id: Option<String>) {
        let span = info_span!(
            parent: Span::none(),
            "meshlium_message",
            topic = %topic,
            client_id = client_id.as_deref().unwrap_or_default(),
            payload_size = payload.len(),
            device_id = field::Empty,
        );

        async {
            let result = AssertUnwindSafe(self.run_stages(&payload, client_id.as_deref()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(DomainError::PipelineFault(panic_message(panic))));

            match result {
                Ok(ack) => debug!(device_id = %ack.device_id, "message processed"),
                Err(DomainError::UnauthorizedDevice(device_id)) => {
                    info!(device_id = %device_id, "dropping message from unauthorized device");
                    self.reporter
                        .log(LogRecord::unauthorized_device(&device_id))
                        .await;
                }
                Err(e) => self.reporter.handle_exception(&e).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn run_stages(&self, payload: &[u8], client_id: Option<&str>) -> DomainResult<ForwardAck> {
        let ValidatedReading { device_id, reading } = self.validator.parse(payload)?;
        Span::current().record("device_id", device_id.as_str());

        let device = match self.registry.resolve(&device_id).await? {
            Resolution::Authorized(device) => device,
            Resolution::Unauthorized => return Err(DomainError::UnauthorizedDevice(device_id)),
        };

        let device = self.reconciler.reconcile(&device, &reading).await?;
        self.forwarder.forward(&device, &reading, client_id).await
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "message pipeline panicked".to_string()
    }
}

/// Event loop turning transport events into authenticator, pipeline and
/// lifecycle calls.
pub struct IngestionService {
    topic: String,
    authenticator: SessionAuthenticator,
    pipeline: IngestionPipeline,
    forwarder: Arc<Forwarder>,
    lifecycle: Arc<LifecycleController>,
    reporter: Arc<dyn PlatformReporter>,
    sessions: HashMap<String, Session>,
}

impl IngestionService {
    pub fn new(
        config: &MeshliumGatewayConfig,
        registry: Arc<DeviceRegistry>,
        producer: Arc<dyn ReadingProducer>,
        reporter: Arc<dyn PlatformReporter>,
    ) -> Self {
        let forwarder = Arc::new(Forwarder::new(producer, Arc::clone(&reporter)));
        let pipeline = IngestionPipeline::new(
            MessageValidator::new(config.device_id_field.clone()),
            registry,
            Arc::clone(&forwarder),
            Arc::clone(&reporter),
        );

        Self {
            topic: config.topic.clone(),
            authenticator: SessionAuthenticator::new(config.credentials(), Arc::clone(&reporter)),
            pipeline,
            forwarder,
            lifecycle: Arc::new(LifecycleController::new(
                config.shutdown_timeout(),
                Arc::clone(&reporter),
            )),
            reporter,
            sessions: HashMap::new(),
        }
    }

    pub fn lifecycle(&self) -> Arc<LifecycleController> {
        Arc::clone(&self.lifecycle)
    }

    pub fn subscribe_completions(&self) -> broadcast::Receiver<ForwardAck> {
        self.forwarder.subscribe()
    }

    /// Dispatches events until a `Close` event, cancellation of `ctx` or the
    /// end of the event stream, then shuts down through the lifecycle
    /// controller. `ctx` is cancelled on the way out so sibling processes stop.
    pub async fn run(
        mut self,
        mut events: TransportEventReceiver,
        ctx: CancellationToken,
        transport: &dyn TransportControl,
    ) -> ShutdownOutcome {
        info!(topic = %self.topic, "ingestion service started");
        self.reporter.notify_ready().await;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Close) => {
                        info!("transport requested close");
                        break;
                    }
                    Some(event) => self.dispatch(event).await,
                    None => {
                        warn!("transport event stream ended");
                        break;
                    }
                }
            }
        }

        // Deny anything still queued so transports are not left waiting.
        events.close();
        while let Ok(event) = events.try_recv() {
            if let TransportEvent::Authenticate { respond_to, .. } = event {
                let _ = respond_to.send(false);
            }
        }

        let outcome = self.lifecycle.shutdown(transport).await;
        ctx.cancel();
        outcome
    }

    async fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Authenticate {
                client_id,
                username,
                password,
                respond_to,
            } => {
                let accepted = self.lifecycle.is_accepting()
                    && self
                        .authenticator
                        .authenticate(client_id.as_deref(), username.as_deref(), password.as_deref())
                        .await;
                if accepted {
                    if let Some(client_id) = client_id {
                        self.sessions
                            .insert(client_id.clone(), Session::new(client_id));
                    }
                }
                let _ = respond_to.send(accepted);
            }
            TransportEvent::Connected { client_id } => {
                self.sessions
                    .entry(client_id.clone())
                    .or_insert_with(|| Session::new(client_id.clone()));
                self.reporter.notify_connection(&client_id).await;
            }
            TransportEvent::Disconnected { client_id } => {
                if let Some(session) = self.sessions.remove(&client_id) {
                    let connected_for = chrono::Utc::now() - session.authenticated_at;
                    debug!(
                        client_id = %client_id,
                        connected_for_ms = connected_for.num_milliseconds(),
                        "session ended"
                    );
                }
                self.reporter.notify_disconnection(&client_id).await;
            }
            TransportEvent::Message {
                topic,
                payload,
                client_id,
            } => {
                if topic != self.topic {
                    debug!(topic = %topic, "ignoring message on unrelated topic");
                    return;
                }
                let pipeline = self.pipeline.clone();
                let spawned = self.lifecycle.spawn(async move {
                    pipeline.process(topic, payload, client_id).await;
                });
                if spawned.is_none() {
                    warn!("gateway is draining, dropping message");
                }
            }
            TransportEvent::Close => {}
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
