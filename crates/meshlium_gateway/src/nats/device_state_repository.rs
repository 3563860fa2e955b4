use anyhow::Context;
use async_trait::async_trait;
use common::domain::{DeviceState, DeviceStateRepository, DomainError, DomainResult};
use common::nats::{traced_headers, JetStreamPublisher};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Serialize)]
struct DeviceStateUpdate<'a> {
    device_id: &'a str,
    #[serde(flatten)]
    state: &'a DeviceState,
}

/// Publishes device state snapshots to `{base_subject}.{device_id}`.
pub struct NatsDeviceStateRepository {
    jetstream: Arc<dyn JetStreamPublisher>,
    base_subject: String,
}

impl NatsDeviceStateRepository {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, base_subject: String) -> Self {
        Self {
            jetstream,
            base_subject,
        }
    }
}

#[async_trait]
impl DeviceStateRepository for NatsDeviceStateRepository {
    async fn set_device_state(&self, device_id: &str, state: &DeviceState) -> DomainResult<()> {
        let payload = serde_json::to_vec(&DeviceStateUpdate { device_id, state })
            .context("Failed to serialize device state")
            .map_err(DomainError::RepositoryError)?;

        let subject = format!("{}.{}", self.base_subject, device_id);

        debug!(
            subject = %subject,
            device_id = %device_id,
            size_bytes = payload.len(),
            "publishing device state"
        );

        self.jetstream
            .publish(subject, traced_headers(), payload.into())
            .await
            .context("Failed to publish device state")
            .map_err(DomainError::RepositoryError)
    }
}
