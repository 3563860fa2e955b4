use crate::domain::DeviceRegistry;
use crate::nats::DeviceRegistrySyncService;
use anyhow::Result;
use common::nats::{
    JetStreamConsumer, NatsConsumeLoggingLayer, NatsConsumeLoggingService,
    NatsConsumeTracingLayer, NatsConsumeTracingService, TowerConsumer, TowerConsumerConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::debug;

type DeviceRegistrySyncLayeredService =
    NatsConsumeTracingService<NatsConsumeLoggingService<DeviceRegistrySyncService>>;

/// Durable consumer keeping the device cache in line with the platform.
pub struct DeviceRegistrySyncConsumer {
    consumer: TowerConsumer<DeviceRegistrySyncLayeredService>,
}

impl DeviceRegistrySyncConsumer {
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        config: TowerConsumerConfig,
        registry: Arc<DeviceRegistry>,
    ) -> Result<Self> {
        debug!(
            stream = %config.stream_name,
            consumer = %config.consumer_name,
            filter = %config.subject_filter,
            "initializing device registry sync consumer"
        );

        let service = ServiceBuilder::new()
            .layer(NatsConsumeTracingLayer::new())
            .layer(NatsConsumeLoggingLayer::new())
            .service(DeviceRegistrySyncService::new(registry));

        let consumer = TowerConsumer::new(jetstream, config, service).await?;

        Ok(Self { consumer })
    }

    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        debug!("starting device registry sync consumer");
        self.consumer.run(ctx).await
    }
}
