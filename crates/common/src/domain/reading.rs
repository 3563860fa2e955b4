use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured sensor reading decoded from a device payload.
///
/// Fields are passed through unchanged; the gateway only ever inspects the
/// device-origin identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reading(Map<String, Value>);

impl Reading {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns the value of `field` when it is a non-empty string.
    pub fn string_field(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Reading {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A reading that passed envelope validation together with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedReading {
    pub device_id: String,
    pub reading: Reading,
}

/// Reading handed to the downstream pipeline once state has been updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardedReading {
    pub device_id: String,
    pub client_id: Option<String>,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub reading: Reading,
}
