use serde::Serialize;
use serde_json::Value;

pub const DATA_RECEIVED_TITLE: &str = "Meshlium Gateway - Data Received.";
pub const UNAUTHORIZED_DEVICE_TITLE: &str = "Meshlium Gateway - Unauthorized Device";
pub const AUTHENTICATION_FAILED_TITLE: &str = "Meshlium Gateway - Authentication Failed";
pub const NO_CLIENT_ID: &str = "No Client ID";

/// Structured record handed to the platform log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl LogRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            device: None,
            data: None,
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn data_received(client_id: Option<&str>, data: Value) -> Self {
        Self::new(DATA_RECEIVED_TITLE)
            .with_device(client_id.unwrap_or(NO_CLIENT_ID))
            .with_data(data)
    }

    pub fn unauthorized_device(device_id: &str) -> Self {
        Self::new(UNAUTHORIZED_DEVICE_TITLE).with_device(device_id)
    }

    pub fn authentication_failed(client_id: Option<&str>) -> Self {
        Self::new(AUTHENTICATION_FAILED_TITLE).with_device(client_id.unwrap_or(NO_CLIENT_ID))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.title.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unauthorized_record_omits_data() {
        let record = LogRecord::unauthorized_device("AGP_9");
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"title": UNAUTHORIZED_DEVICE_TITLE, "device": "AGP_9"})
        );
    }

    #[test]
    fn test_authentication_failed_uses_placeholder() {
        let record = LogRecord::authentication_failed(None);
        assert_eq!(record.device.as_deref(), Some(NO_CLIENT_ID));
    }

    #[test]
    fn test_data_received_carries_reading() {
        let record = LogRecord::data_received(Some("AGP_2"), json!({"id": "15819"}));
        assert_eq!(record.device.as_deref(), Some("AGP_2"));
        assert_eq!(record.data, Some(json!({"id": "15819"})));
        assert!(record.to_json().contains("Data Received."));
    }
}
