use async_trait::async_trait;
use common::domain::{display_raw, DomainError, LogRecord, PlatformReporter};
use tracing::{error, info};

/// Renders platform log and notification calls as structured tracing events.
pub struct TracingPlatformReporter {
    topic: String,
}

impl TracingPlatformReporter {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl PlatformReporter for TracingPlatformReporter {
    async fn log(&self, record: LogRecord) {
        info!(
            title = %record.title,
            device = record.device.as_deref().unwrap_or_default(),
            record = %record.to_json(),
            "{}",
            record.title
        );
    }

    async fn handle_exception(&self, error: &DomainError) {
        match error.raw_payload() {
            Some(raw) => error!(error = %error, raw = %display_raw(raw), "gateway error"),
            None => error!(error = %error, "gateway error"),
        }
    }

    async fn notify_connection(&self, client_id: &str) {
        info!(client_id = %client_id, "Meshlium Gateway - Client connected");
    }

    async fn notify_disconnection(&self, client_id: &str) {
        info!(client_id = %client_id, "Meshlium Gateway - Client disconnected");
    }

    async fn notify_ready(&self) {
        info!(topic = %self.topic, "Meshlium Gateway - Initialized. Listening on topic {}", self.topic);
    }

    async fn notify_close(&self) {
        info!(topic = %self.topic, "Meshlium Gateway - Closed");
    }
}
