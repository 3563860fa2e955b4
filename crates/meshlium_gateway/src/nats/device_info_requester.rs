use crate::nats::CORRELATION_ID_HEADER;
use anyhow::Context;
use async_trait::async_trait;
use common::domain::{DeviceInfoRequest, DeviceInfoRequester, DomainError, DomainResult};
use common::nats::{traced_headers, CorePublisher};
use std::sync::Arc;
use tracing::debug;

/// Publishes device info requests on `{base_subject}.{device_id}` with the
/// gateway's reply inbox as reply-to.
pub struct NatsDeviceInfoRequester {
    publisher: Arc<dyn CorePublisher>,
    base_subject: String,
    reply_subject: String,
}

impl NatsDeviceInfoRequester {
    pub fn new(publisher: Arc<dyn CorePublisher>, base_subject: String, reply_subject: String) -> Self {
        Self {
            publisher,
            base_subject,
            reply_subject,
        }
    }
}

#[async_trait]
impl DeviceInfoRequester for NatsDeviceInfoRequester {
    async fn request_device_info(&self, request: &DeviceInfoRequest) -> DomainResult<()> {
        let payload = serde_json::to_vec(request)
            .context("Failed to serialize device info request")
            .map_err(DomainError::RepositoryError)?;

        let subject = format!("{}.{}", self.base_subject, request.device_id);

        let mut headers = traced_headers();
        headers.insert(CORRELATION_ID_HEADER, request.correlation_id.as_str());

        debug!(
            subject = %subject,
            correlation_id = %request.correlation_id,
            "requesting device info"
        );

        self.publisher
            .publish_with_reply(subject, self.reply_subject.clone(), headers, payload.into())
            .await
            .context("Failed to publish device info request")
            .map_err(DomainError::RepositoryError)
    }
}
