use crate::domain::Credentials;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_DEVICE_ID_FIELD: &str = "id_wasp";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshliumGatewayConfig {
    /// Topic whose messages enter the pipeline; everything else is ignored.
    pub topic: String,

    /// Payload field naming the originating device.
    pub device_id_field: String,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Bound on a remote device lookup (default: 5000 ms)
    pub resolution_timeout_ms: u64,

    /// Bound on drain + transport close (default: 5000 ms)
    pub shutdown_timeout_ms: u64,
}

impl Default for MeshliumGatewayConfig {
    fn default() -> Self {
        Self {
            topic: "meshlium".to_string(),
            device_id_field: DEFAULT_DEVICE_ID_FIELD.to_string(),
            username: None,
            password: None,
            resolution_timeout_ms: 5000,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl MeshliumGatewayConfig {
    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.resolution_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::from_parts(self.username.as_deref(), self.password.as_deref())
    }
}
