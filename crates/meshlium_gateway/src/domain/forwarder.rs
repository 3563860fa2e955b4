use chrono::{DateTime, Utc};
use common::domain::{
    Device, DomainError, DomainResult, ForwardedReading, LogRecord, PlatformReporter, Reading,
    ReadingProducer,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Completion signal emitted after a successful forward.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardAck {
    pub device_id: String,
    pub client_id: Option<String>,
    pub forwarded_at: DateTime<Utc>,
}

pub struct Forwarder {
    producer: Arc<dyn ReadingProducer>,
    reporter: Arc<dyn PlatformReporter>,
    completions: broadcast::Sender<ForwardAck>,
}

impl Forwarder {
    pub fn new(producer: Arc<dyn ReadingProducer>, reporter: Arc<dyn PlatformReporter>) -> Self {
        let (completions, _) = broadcast::channel(256);
        Self {
            producer,
            reporter,
            completions,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForwardAck> {
        self.completions.subscribe()
    }

    /// Pipes `reading` downstream once. Failures are not retried here.
    pub async fn forward(
        &self,
        device: &Device,
        reading: &Reading,
        client_id: Option<&str>,
    ) -> DomainResult<ForwardAck> {
        let forwarded = ForwardedReading {
            device_id: device.id.clone(),
            client_id: client_id.map(str::to_string),
            received_at: Utc::now(),
            reading: reading.clone(),
        };

        self.producer
            .pipe(&forwarded)
            .await
            .map_err(|e| DomainError::ForwardError {
                device_id: device.id.clone(),
                source: anyhow::Error::new(e),
            })?;

        self.reporter
            .log(LogRecord::data_received(client_id, reading.clone().into_value()))
            .await;

        let ack = ForwardAck {
            device_id: device.id.clone(),
            client_id: forwarded.client_id,
            forwarded_at: Utc::now(),
        };
        // No subscribers is fine.
        let _ = self.completions.send(ack.clone());
        debug!(device_id = %device.id, "reading forwarded");

        Ok(ack)
    }
}
