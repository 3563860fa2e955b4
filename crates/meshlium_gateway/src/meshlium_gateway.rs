use crate::domain::{
    transport_channel, DeviceRegistry, IngestionService, MeshliumGatewayConfig, ShutdownOutcome,
    TransportEventReceiver, TransportSupervisor,
};
use crate::http::{AuthHook, AuthHookConfig};
use crate::mqtt::{MqttBridge, MqttBridgeConfig};
use crate::nats::{
    DeviceInfoReplyListener, DeviceRegistrySyncConsumer, NatsDeviceInfoRequester,
    NatsDeviceStateRepository, NatsReadingProducer,
};
use common::domain::{Device, PlatformReporter};
use common::nats::{NatsClient, TowerConsumerConfig};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type GatewayProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

pub struct MeshliumGatewayModuleConfig {
    pub gateway: MeshliumGatewayConfig,
    pub mqtt: MqttBridgeConfig,
    /// `None` disables the HTTP auth hook.
    pub auth_hook: Option<AuthHookConfig>,
    pub device_info_subject: String,
    pub device_state_stream: String,
    pub readings_stream: String,
    pub devices_stream: String,
    pub devices_consumer_name: String,
    pub devices_batch_size: usize,
    pub devices_max_wait: Duration,
    /// Seeded into the registry as authorized before the first message.
    pub known_devices: Vec<String>,
}

/// The wired gateway: ingestion service, transports and NATS adapters.
pub struct MeshliumGateway {
    service: IngestionService,
    events: TransportEventReceiver,
    supervisor: TransportSupervisor,
    bridge: MqttBridge,
    auth_hook: Option<AuthHook>,
    reply_listener: DeviceInfoReplyListener,
    replies: async_nats::Subscriber,
    registry_sync: DeviceRegistrySyncConsumer,
}

impl MeshliumGateway {
    pub async fn new(
        nats_client: Arc<NatsClient>,
        reporter: Arc<dyn PlatformReporter>,
        config: MeshliumGatewayModuleConfig,
    ) -> anyhow::Result<Self> {
        debug!("initializing meshlium gateway module");

        nats_client
            .ensure_stream(&config.readings_stream, "Readings forwarded by the meshlium gateway")
            .await?;
        nats_client
            .ensure_stream(&config.device_state_stream, "Device state snapshots")
            .await?;
        nats_client
            .ensure_stream(&config.devices_stream, "Device registry add/remove events")
            .await?;

        let reply_subject = nats_client.new_inbox();
        let replies = nats_client.subscribe(reply_subject.clone()).await?;

        let jetstream_publisher = nats_client.create_publisher_client();
        let registry = Arc::new(DeviceRegistry::new(
            Arc::new(NatsDeviceInfoRequester::new(
                nats_client.create_core_publisher(),
                config.device_info_subject.clone(),
                reply_subject,
            )),
            Arc::new(NatsDeviceStateRepository::new(
                Arc::clone(&jetstream_publisher),
                config.device_state_stream.clone(),
            )),
            config.gateway.resolution_timeout(),
        ));

        for device_id in &config.known_devices {
            registry.add(Device::new(device_id.clone()))?;
        }
        debug!(known_devices = registry.len(), "device registry seeded");

        let producer = Arc::new(NatsReadingProducer::new(
            jetstream_publisher,
            config.readings_stream.clone(),
        ));
        let service = IngestionService::new(
            &config.gateway,
            Arc::clone(&registry),
            producer,
            reporter,
        );
        let lifecycle = service.lifecycle();

        let (sender, events) = transport_channel();
        let supervisor = TransportSupervisor::new(lifecycle.accept_token());

        let bridge = MqttBridge::new(config.mqtt, sender.clone());
        let auth_hook = config
            .auth_hook
            .map(|hook_config| AuthHook::new(hook_config, sender, lifecycle.subscribe()));

        let registry_sync = DeviceRegistrySyncConsumer::new(
            nats_client.create_consumer_client(),
            TowerConsumerConfig {
                stream_name: config.devices_stream.clone(),
                consumer_name: config.devices_consumer_name,
                subject_filter: format!("{}.>", config.devices_stream),
                batch_size: config.devices_batch_size,
                max_wait: config.devices_max_wait,
            },
            Arc::clone(&registry),
        )
        .await?;

        Ok(Self {
            service,
            events,
            supervisor,
            bridge,
            auth_hook,
            reply_listener: DeviceInfoReplyListener::new(registry),
            replies,
            registry_sync,
        })
    }

    /// Splits the gateway into named runner processes.
    ///
    /// Transports stop on the lifecycle's accept token. The reply listener
    /// and registry sync outlive the drain and stop once ingestion returns.
    pub fn into_runner_processes(self) -> Vec<(String, GatewayProcess)> {
        let Self {
            service,
            events,
            supervisor,
            bridge,
            auth_hook,
            reply_listener,
            replies,
            registry_sync,
        } = self;

        let background = CancellationToken::new();
        let mut processes: Vec<(String, GatewayProcess)> = Vec::new();

        processes.push((
            "mqtt_bridge".to_string(),
            Box::new({
                let shutdown = supervisor.token();
                let bridge = supervisor.track(bridge.run(shutdown));
                move |_ctx| Box::pin(async move { Ok(bridge.await?) })
            }),
        ));

        if let Some(auth_hook) = auth_hook {
            processes.push((
                "auth_hook".to_string(),
                Box::new({
                    let shutdown = supervisor.token();
                    let hook = supervisor.track(auth_hook.run(shutdown));
                    move |_ctx| Box::pin(async move { Ok(hook.await?) })
                }),
            ));
        }

        processes.push((
            "device_info_replies".to_string(),
            Box::new({
                let stop = background.clone();
                move |_ctx| Box::pin(async move { reply_listener.run(replies, stop).await })
            }),
        ));

        processes.push((
            "device_registry_sync".to_string(),
            Box::new({
                let stop = background.clone();
                move |_ctx| Box::pin(async move { registry_sync.run(stop).await })
            }),
        ));

        processes.push((
            "ingestion".to_string(),
            Box::new(move |ctx| {
                Box::pin(async move {
                    let _stop_background = background.drop_guard();
                    match service.run(events, ctx, &supervisor).await {
                        ShutdownOutcome::Closed => Ok(()),
                        ShutdownOutcome::ForcedTermination => {
                            Err(anyhow::anyhow!("gateway did not close within the shutdown bound"))
                        }
                    }
                })
            }),
        ));

        processes
    }
}
