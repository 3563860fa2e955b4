use crate::domain::DeviceRegistry;
use crate::nats::CORRELATION_ID_HEADER;
use async_nats::HeaderMap;
use common::domain::{DeviceInfoReply, DomainError, DomainResult};
use common::nats::set_span_parent_from_headers;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Span};

/// Feeds platform replies from the gateway inbox into the device registry.
pub struct DeviceInfoReplyListener {
    registry: Arc<DeviceRegistry>,
}

impl DeviceInfoReplyListener {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Returns whether a pending lookup was waiting for this reply.
    pub fn handle_reply(&self, headers: Option<&HeaderMap>, payload: &[u8]) -> DomainResult<bool> {
        let mut reply: DeviceInfoReply = serde_json::from_slice(payload).map_err(|e| {
            DomainError::RepositoryError(anyhow::anyhow!("invalid device info reply: {}", e))
        })?;

        if reply.correlation_id.is_empty() {
            if let Some(correlation_id) = headers
                .and_then(|headers| headers.get(CORRELATION_ID_HEADER))
                .map(|value| value.as_str().to_string())
            {
                reply.correlation_id = correlation_id;
            }
        }

        if reply.correlation_id.is_empty() {
            return Err(DomainError::RepositoryError(anyhow::anyhow!(
                "device info reply carries no correlation id"
            )));
        }

        Ok(self
            .registry
            .complete_resolution(&reply.correlation_id, reply.device))
    }

    pub async fn run<S>(self, mut replies: S, ctx: CancellationToken) -> anyhow::Result<()>
    where
        S: Stream<Item = async_nats::Message> + Unpin,
    {
        info!("listening for device info replies");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                message = replies.next() => {
                    let Some(message) = message else {
                        warn!("device info reply subscription closed");
                        break;
                    };

                    let span = info_span!(
                        parent: Span::none(),
                        "device_info_reply",
                        subject = %message.subject,
                    );
                    set_span_parent_from_headers(&span, message.headers.as_ref());
                    let _entered = span.enter();

                    match self.handle_reply(message.headers.as_ref(), &message.payload) {
                        Ok(true) => debug!("device info reply delivered"),
                        Ok(false) => debug!("late device info reply ignored"),
                        Err(e) => warn!(error = %e, "discarding device info reply"),
                    }
                }
            }
        }

        Ok(())
    }
}
