//! Drives the ingestion service end to end through the transport event
//! channel, with in-memory platform collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{
    Device, DeviceInfoRequest, DeviceInfoRequester, DeviceState, DeviceStateRepository,
    DomainError, DomainResult, ForwardedReading, LogRecord, PlatformReporter, ReadingProducer,
    AUTHENTICATION_FAILED_TITLE, DATA_RECEIVED_TITLE, UNAUTHORIZED_DEVICE_TITLE,
};
use meshlium_gateway::{
    transport_channel, DeviceRegistry, IngestionService, LifecycleState, MeshliumGatewayConfig,
    ShutdownOutcome, TransportControl, TransportEvent, TransportEventSender,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "meshlium";

const AGP_2_FRAME: &str = r#"{"id":"15819","id_wasp":"AGP_2","id_secret":"751C67057C105442","sensor":"TC","value":"21.56","datetime":"2020-10-15T13:25:41+03:00"}"#;

/// Platform directory answering lookups synchronously, or never when silent.
struct FakePlatform {
    directory: HashMap<String, Device>,
    silent: bool,
    registry: OnceLock<Arc<DeviceRegistry>>,
    requests: Mutex<Vec<DeviceInfoRequest>>,
}

impl FakePlatform {
    fn new(authorized: &[&str], silent: bool) -> Arc<Self> {
        Arc::new(Self {
            directory: authorized
                .iter()
                .map(|id| (id.to_string(), Device::new(*id)))
                .collect(),
            silent,
            registry: OnceLock::new(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<DeviceInfoRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceInfoRequester for FakePlatform {
    async fn request_device_info(&self, request: &DeviceInfoRequest) -> DomainResult<()> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.silent {
            let registry = self.registry.get().expect("registry wired");
            registry.complete_resolution(
                &request.correlation_id,
                self.directory.get(&request.device_id).cloned(),
            );
        }
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryStateStore {
    states: Mutex<HashMap<String, DeviceState>>,
}

#[async_trait]
impl DeviceStateRepository for InMemoryStateStore {
    async fn set_device_state(&self, device_id: &str, state: &DeviceState) -> DomainResult<()> {
        self.states
            .lock()
            .unwrap()
            .insert(device_id.to_string(), state.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingProducer {
    forwarded: Mutex<Vec<ForwardedReading>>,
}

#[async_trait]
impl ReadingProducer for RecordingProducer {
    async fn pipe(&self, reading: &ForwardedReading) -> DomainResult<()> {
        self.forwarded.lock().unwrap().push(reading.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingReporter {
    logs: Mutex<Vec<LogRecord>>,
    exceptions: Mutex<Vec<(String, Option<Vec<u8>>)>>,
}

impl RecordingReporter {
    fn titles(&self) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .map(|record| record.title.clone())
            .collect()
    }
}

#[async_trait]
impl PlatformReporter for RecordingReporter {
    async fn log(&self, record: LogRecord) {
        self.logs.lock().unwrap().push(record);
    }

    async fn handle_exception(&self, error: &DomainError) {
        self.exceptions
            .lock()
            .unwrap()
            .push((error.to_string(), error.raw_payload().map(<[u8]>::to_vec)));
    }

    async fn notify_connection(&self, _client_id: &str) {}

    async fn notify_disconnection(&self, _client_id: &str) {}

    async fn notify_ready(&self) {}

    async fn notify_close(&self) {}
}

#[derive(Default)]
struct FakeTransport {
    closed: Mutex<bool>,
}

#[async_trait]
impl TransportControl for FakeTransport {
    async fn close(&self) -> DomainResult<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

struct Harness {
    platform: Arc<FakePlatform>,
    registry: Arc<DeviceRegistry>,
    states: Arc<InMemoryStateStore>,
    producer: Arc<RecordingProducer>,
    reporter: Arc<RecordingReporter>,
    service: IngestionService,
}

impl Harness {
    fn new(config: MeshliumGatewayConfig, platform: Arc<FakePlatform>) -> Self {
        let states = Arc::new(InMemoryStateStore::default());
        let producer = Arc::new(RecordingProducer::default());
        let reporter = Arc::new(RecordingReporter::default());

        let registry = Arc::new(DeviceRegistry::new(
            Arc::clone(&platform) as Arc<dyn DeviceInfoRequester>,
            Arc::clone(&states) as Arc<dyn DeviceStateRepository>,
            config.resolution_timeout(),
        ));
        let _ = platform.registry.set(Arc::clone(&registry));

        let service = IngestionService::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&producer) as Arc<dyn ReadingProducer>,
            Arc::clone(&reporter) as Arc<dyn PlatformReporter>,
        );

        Self {
            platform,
            registry,
            states,
            producer,
            reporter,
            service,
        }
    }

    /// Sends `events` followed by `Close` and runs the service to completion.
    async fn run(self, events: Vec<TransportEvent>) -> (ShutdownOutcome, Outcome) {
        let (sender, receiver) = transport_channel();
        let transport = FakeTransport::default();
        let lifecycle = self.service.lifecycle();

        send_all(&sender, events).await;
        sender.send(TransportEvent::Close).await.unwrap();

        let outcome = self
            .service
            .run(receiver, CancellationToken::new(), &transport)
            .await;

        if outcome == ShutdownOutcome::Closed {
            assert!(*transport.closed.lock().unwrap());
            assert_eq!(lifecycle.state(), LifecycleState::Closed);
        }

        (
            outcome,
            Outcome {
                platform: self.platform,
                registry: self.registry,
                states: self.states,
                producer: self.producer,
                reporter: self.reporter,
            },
        )
    }
}

struct Outcome {
    platform: Arc<FakePlatform>,
    registry: Arc<DeviceRegistry>,
    states: Arc<InMemoryStateStore>,
    producer: Arc<RecordingProducer>,
    reporter: Arc<RecordingReporter>,
}

impl Outcome {
    fn forwarded(&self) -> Vec<ForwardedReading> {
        self.producer.forwarded.lock().unwrap().clone()
    }

    fn state_of(&self, device_id: &str) -> Option<DeviceState> {
        self.states.lock_state(device_id)
    }
}

impl InMemoryStateStore {
    fn lock_state(&self, device_id: &str) -> Option<DeviceState> {
        self.states.lock().unwrap().get(device_id).cloned()
    }
}

async fn send_all(sender: &TransportEventSender, events: Vec<TransportEvent>) {
    for event in events {
        sender.send(event).await.unwrap();
    }
}

fn message(payload: &str, client_id: Option<&str>) -> TransportEvent {
    TransportEvent::Message {
        topic: TOPIC.to_string(),
        payload: Bytes::copy_from_slice(payload.as_bytes()),
        client_id: client_id.map(str::to_string),
    }
}

#[tokio::test]
async fn test_authorized_frame_is_reconciled_and_forwarded_once() {
    let harness = Harness::new(
        MeshliumGatewayConfig::default(),
        FakePlatform::new(&["AGP_2"], false),
    );

    let (outcome, result) = harness
        .run(vec![message(AGP_2_FRAME, Some("meshlium-01"))])
        .await;

    assert_eq!(outcome, ShutdownOutcome::Closed);

    let forwarded = result.forwarded();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].device_id, "AGP_2");
    assert_eq!(forwarded[0].client_id.as_deref(), Some("meshlium-01"));

    let state = result.state_of("AGP_2").unwrap();
    let current = state.current_reading.unwrap();
    assert_eq!(current.get("id"), Some(&json!("15819")));
    assert!(state.previous_reading.is_none());

    assert!(result.registry.is_known("AGP_2"));
    assert_eq!(result.registry.pending_count(), 0);

    let logs = result.reporter.logs.lock().unwrap().clone();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].title, DATA_RECEIVED_TITLE);
    assert_eq!(logs[0].device.as_deref(), Some("meshlium-01"));
    assert_eq!(logs[0].data.as_ref().unwrap()["value"], "21.56");
}

#[tokio::test]
async fn test_second_reading_chains_previous_state() {
    let harness = Harness::new(
        MeshliumGatewayConfig::default(),
        FakePlatform::new(&["AGP_2"], false),
    );
    harness.registry.add(Device::new("AGP_2")).unwrap();

    let (service_outcome, states) = {
        let (sender, receiver) = transport_channel();
        let transport = FakeTransport::default();
        let mut completions = harness.service.subscribe_completions();
        let ctx = CancellationToken::new();

        let runner = tokio::spawn({
            let ctx = ctx.clone();
            async move {
                let outcome = harness.service.run(receiver, ctx, &transport).await;
                (outcome, harness.states)
            }
        });

        sender
            .send(message(r#"{"id_wasp":"AGP_2","TC":"20.1"}"#, None))
            .await
            .unwrap();
        completions.recv().await.unwrap();
        sender
            .send(message(r#"{"id_wasp":"AGP_2","TC":"21.4"}"#, None))
            .await
            .unwrap();
        completions.recv().await.unwrap();

        ctx.cancel();
        runner.await.unwrap()
    };

    assert_eq!(service_outcome, ShutdownOutcome::Closed);
    let state = states.lock_state("AGP_2").unwrap();
    assert_eq!(state.current_reading.unwrap().get("TC"), Some(&json!("21.4")));
    assert_eq!(state.previous_reading.unwrap().get("TC"), Some(&json!("20.1")));
}

#[tokio::test]
async fn test_malformed_payload_reported_once_with_raw_bytes() {
    let harness = Harness::new(
        MeshliumGatewayConfig::default(),
        FakePlatform::new(&["AGP_2"], false),
    );

    let (_, result) = harness.run(vec![message("not-json", None)]).await;

    let exceptions = result.reporter.exceptions.lock().unwrap().clone();
    assert_eq!(exceptions.len(), 1);
    assert!(exceptions[0].0.contains("Raw Data: not-json"));
    assert_eq!(exceptions[0].1.as_deref(), Some(&b"not-json"[..]));
    assert!(result.forwarded().is_empty());
    assert!(result.platform.requests().is_empty());
}

#[tokio::test]
async fn test_missing_device_field_is_reported_not_forwarded() {
    let harness = Harness::new(
        MeshliumGatewayConfig::default(),
        FakePlatform::new(&["AGP_2"], false),
    );

    let (_, result) = harness
        .run(vec![message(r#"{"id":"15819","sensor":"TC"}"#, None), message("", None)])
        .await;

    let exceptions = result.reporter.exceptions.lock().unwrap().clone();
    assert_eq!(exceptions.len(), 2);
    assert!(exceptions.iter().all(|(text, _)| text.contains("id_wasp")));
    assert!(result.forwarded().is_empty());
}

#[tokio::test]
async fn test_unauthorized_device_is_logged_not_forwarded() {
    let harness = Harness::new(
        MeshliumGatewayConfig::default(),
        FakePlatform::new(&["AGP_2"], false),
    );

    let (outcome, result) = harness
        .run(vec![message(r#"{"id_wasp":"AGP_9","TC":"19.0"}"#, None)])
        .await;

    assert_eq!(outcome, ShutdownOutcome::Closed);
    assert!(result.forwarded().is_empty());
    assert!(result.state_of("AGP_9").is_none());
    assert!(!result.registry.is_known("AGP_9"));
    assert!(result.reporter.exceptions.lock().unwrap().is_empty());
    assert_eq!(result.reporter.titles(), vec![UNAUTHORIZED_DEVICE_TITLE.to_string()]);
}

#[tokio::test]
async fn test_one_bad_message_does_not_affect_others() {
    let harness = Harness::new(
        MeshliumGatewayConfig::default(),
        FakePlatform::new(&["AGP_2"], false),
    );

    let (_, result) = harness
        .run(vec![
            message("{broken", None),
            message(AGP_2_FRAME, Some("meshlium-01")),
            message(r#"[1, 2, 3]"#, None),
        ])
        .await;

    assert_eq!(result.forwarded().len(), 1);
    assert_eq!(result.reporter.exceptions.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_wrong_credentials_are_denied() {
    let config = MeshliumGatewayConfig {
        username: Some("hello".to_string()),
        password: Some("world".to_string()),
        ..Default::default()
    };
    let harness = Harness::new(config, FakePlatform::new(&[], false));

    let (denied_tx, denied) = oneshot::channel();
    let (allowed_tx, allowed) = oneshot::channel();

    let (_, result) = harness
        .run(vec![
            TransportEvent::Authenticate {
                client_id: Some("intruder".to_string()),
                username: Some("wrong".to_string()),
                password: Some("creds".to_string()),
                respond_to: denied_tx,
            },
            TransportEvent::Authenticate {
                client_id: Some("meshlium-01".to_string()),
                username: Some("hello".to_string()),
                password: Some("world".to_string()),
                respond_to: allowed_tx,
            },
        ])
        .await;

    assert!(!denied.await.unwrap());
    assert!(allowed.await.unwrap());
    assert_eq!(
        result.reporter.titles(),
        vec![AUTHENTICATION_FAILED_TITLE.to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_after_timeout_is_ignored() {
    let config = MeshliumGatewayConfig {
        shutdown_timeout_ms: 10_000,
        ..Default::default()
    };
    let harness = Harness::new(config, FakePlatform::new(&["AGP_7"], true));

    let (outcome, result) = harness
        .run(vec![message(r#"{"id_wasp":"AGP_7"}"#, None)])
        .await;

    assert_eq!(outcome, ShutdownOutcome::Closed);
    assert_eq!(result.reporter.titles(), vec![UNAUTHORIZED_DEVICE_TITLE.to_string()]);
    assert_eq!(result.registry.pending_count(), 0);

    let requests = result.platform.requests();
    assert_eq!(requests.len(), 1);

    let delivered = result
        .registry
        .complete_resolution(&requests[0].correlation_id, Some(Device::new("AGP_7")));

    assert!(!delivered);
    assert!(!result.registry.is_known("AGP_7"));
    assert_eq!(result.registry.pending_count(), 0);
    assert!(result.forwarded().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_silent_platform_does_not_grow_pending_table() {
    let config = MeshliumGatewayConfig {
        shutdown_timeout_ms: 10_000,
        ..Default::default()
    };
    let harness = Harness::new(config, FakePlatform::new(&[], true));

    let events = (0..25)
        .map(|i| message(&format!(r#"{{"id_wasp":"ghost-{}"}}"#, i), None))
        .collect();
    let (outcome, result) = harness.run(events).await;

    assert_eq!(outcome, ShutdownOutcome::Closed);
    assert_eq!(result.platform.requests().len(), 25);
    assert_eq!(result.registry.pending_count(), 0);
    assert!(result.forwarded().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_bound_forces_termination_when_lookup_outlives_it() {
    let config = MeshliumGatewayConfig {
        resolution_timeout_ms: 60_000,
        shutdown_timeout_ms: 5_000,
        ..Default::default()
    };
    let harness = Harness::new(config, FakePlatform::new(&[], true));

    let (outcome, result) = harness
        .run(vec![message(r#"{"id_wasp":"AGP_3"}"#, None)])
        .await;

    assert_eq!(outcome, ShutdownOutcome::ForcedTermination);
    assert!(result.forwarded().is_empty());
}

#[test]
fn test_forwarded_reading_wire_shape() {
    let reading = ForwardedReading {
        device_id: "AGP_2".to_string(),
        client_id: None,
        received_at: chrono::Utc::now(),
        reading: serde_json::from_str(AGP_2_FRAME).unwrap(),
    };

    let value: Value = serde_json::to_value(&reading).unwrap();
    assert_eq!(value["device_id"], "AGP_2");
    assert_eq!(value["reading"]["id_secret"], "751C67057C105442");
}
