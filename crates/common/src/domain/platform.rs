use crate::domain::{
    Device, DeviceState, DomainError, DomainResult, ForwardedReading, LogRecord,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outstanding remote lookup sent to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfoRequest {
    pub device_id: String,
    pub correlation_id: String,
}

/// Platform answer to a [`DeviceInfoRequest`]; `device: None` means unauthorized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfoReply {
    /// Empty when the id travels in a message header instead.
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub device: Option<Device>,
}

/// Issues remote device lookups.
///
/// Implementations only send the request; the answer comes back
/// asynchronously keyed by the correlation id.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceInfoRequester: Send + Sync {
    async fn request_device_info(&self, request: &DeviceInfoRequest) -> DomainResult<()>;
}

/// Persists device state snapshots on the platform.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceStateRepository: Send + Sync {
    async fn set_device_state(&self, device_id: &str, state: &DeviceState) -> DomainResult<()>;
}

/// Downstream consumer of validated readings.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReadingProducer: Send + Sync {
    async fn pipe(&self, reading: &ForwardedReading) -> DomainResult<()>;
}

/// Logging, exception reporting and connection notifications toward the platform.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PlatformReporter: Send + Sync {
    async fn log(&self, record: LogRecord);

    async fn handle_exception(&self, error: &DomainError);

    async fn notify_connection(&self, client_id: &str);

    async fn notify_disconnection(&self, client_id: &str);

    async fn notify_ready(&self);

    async fn notify_close(&self);
}
