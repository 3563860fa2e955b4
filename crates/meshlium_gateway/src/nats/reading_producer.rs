use anyhow::Context;
use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, ForwardedReading, ReadingProducer};
use common::nats::{traced_headers, JetStreamPublisher};
use std::sync::Arc;
use tracing::{debug, info};

/// JetStream producer for forwarded readings.
pub struct NatsReadingProducer {
    jetstream: Arc<dyn JetStreamPublisher>,
    base_subject: String,
}

impl NatsReadingProducer {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, base_subject: String) -> Self {
        info!("created reading producer with base subject: {}", base_subject);
        Self {
            jetstream,
            base_subject,
        }
    }
}

#[async_trait]
impl ReadingProducer for NatsReadingProducer {
    async fn pipe(&self, reading: &ForwardedReading) -> DomainResult<()> {
        let payload = serde_json::to_vec(reading)
            .context("Failed to serialize reading")
            .map_err(DomainError::RepositoryError)?;

        // {base_subject}.{device_id}
        let subject = format!("{}.{}", self.base_subject, reading.device_id);

        debug!(
            subject = %subject,
            device_id = %reading.device_id,
            size_bytes = payload.len(),
            "publishing reading"
        );

        self.jetstream
            .publish(subject.clone(), traced_headers(), payload.into())
            .await
            .context("Failed to publish and acknowledge reading")
            .map_err(DomainError::RepositoryError)?;

        debug!(subject = %subject, "reading published");
        Ok(())
    }
}
