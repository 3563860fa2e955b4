use crate::domain::{DomainError, DomainResult, Reading};
use serde::{Deserialize, Serialize, Serializer};

/// Device record owned by the device registry.
///
/// Platform records may carry the identifier as `_id`. A record that is
/// returned at all is authorized unless it says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(alias = "_id", default)]
    pub id: String,
    #[serde(default = "default_authorized")]
    pub authorized: bool,
    #[serde(default)]
    pub state: DeviceState,
}

fn default_authorized() -> bool {
    true
}

impl Device {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            authorized: true,
            state: DeviceState::default(),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.id.trim().is_empty() {
            return Err(DomainError::InvalidDevice(
                "device record has no id".to_string(),
            ));
        }
        Ok(())
    }
}

/// Current/previous snapshot persisted per device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    #[serde(default)]
    pub current_reading: Option<Reading>,
    #[serde(default, serialize_with = "serialize_or_empty")]
    pub previous_reading: Option<Reading>,
}

impl DeviceState {
    /// Shifts the current reading into `previous_reading` and installs `reading`.
    pub fn advance(&self, reading: Reading) -> DeviceState {
        DeviceState {
            current_reading: Some(reading),
            previous_reading: self.current_reading.clone(),
        }
    }
}

// An absent previous reading goes over the wire as `{}`.
fn serialize_or_empty<S>(reading: &Option<Reading>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match reading {
        Some(reading) => reading.serialize(serializer),
        None => Reading::default().serialize(serializer),
    }
}

/// Registry synchronisation events published by the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceRegistryEvent {
    Added { device: Device },
    Removed { device_id: String },
}

impl DeviceRegistryEvent {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceRegistryEvent::Added { device } => &device.id,
            DeviceRegistryEvent::Removed { device_id } => device_id,
        }
    }
}
