use common::domain::{DomainError, DomainResult, Reading, ValidatedReading};
use serde_json::Value;

/// Decodes raw payloads into readings carrying a device-origin identifier.
#[derive(Debug, Clone)]
pub struct MessageValidator {
    device_id_field: String,
}

impl MessageValidator {
    pub fn new(device_id_field: impl Into<String>) -> Self {
        Self {
            device_id_field: device_id_field.into(),
        }
    }

    pub fn device_id_field(&self) -> &str {
        &self.device_id_field
    }

    /// An empty payload reads as `{}` and so fails on the missing identifier.
    pub fn parse(&self, raw: &[u8]) -> DomainResult<ValidatedReading> {
        let document = if raw.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_slice(raw).map_err(|e| self.parse_error(e.to_string(), raw))?
        };

        let Value::Object(fields) = document else {
            return Err(self.parse_error("expected a JSON object".to_string(), raw));
        };
        let reading = Reading::new(fields);

        let device_id = reading
            .string_field(&self.device_id_field)
            .map(str::to_string)
            .ok_or_else(|| DomainError::MissingDeviceId {
                field: self.device_id_field.clone(),
                raw: raw.to_vec(),
            })?;

        Ok(ValidatedReading { device_id, reading })
    }

    fn parse_error(&self, reason: String, raw: &[u8]) -> DomainError {
        DomainError::PayloadParseError {
            field: self.device_id_field.clone(),
            reason,
            raw: raw.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGP_2: &str = r#"{"id":"15819","id_wasp":"AGP_2","id_secret":"400577471","sensor":"SOIL_D","value":"52.48","datetime":"2016-01-28T12:29:11+10:00"}"#;

    fn validator() -> MessageValidator {
        MessageValidator::new("id_wasp")
    }

    #[test]
    fn test_parses_meshlium_frame() {
        let validated = validator().parse(AGP_2.as_bytes()).unwrap();

        assert_eq!(validated.device_id, "AGP_2");
        assert_eq!(validated.reading.string_field("sensor"), Some("SOIL_D"));
        assert_eq!(validated.reading.fields().len(), 6);
    }

    #[test]
    fn test_malformed_bytes_keep_raw_payload() {
        let err = validator().parse(b"not-json").unwrap_err();

        assert!(matches!(err, DomainError::PayloadParseError { .. }));
        assert_eq!(err.raw_payload(), Some(&b"not-json"[..]));
        assert!(err.to_string().ends_with("Raw Data: not-json"));
    }

    #[test]
    fn test_non_object_document_is_parse_error() {
        let err = validator().parse(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, DomainError::PayloadParseError { .. }));
    }

    #[test]
    fn test_missing_or_empty_device_id() {
        for raw in [
            &br#"{"sensor":"TC"}"#[..],
            br#"{"id_wasp":""}"#,
            br#"{"id_wasp":42}"#,
            b"",
        ] {
            let err = validator().parse(raw).unwrap_err();
            assert!(
                matches!(err, DomainError::MissingDeviceId { .. }),
                "unexpected error for {:?}: {}",
                raw,
                err
            );
            assert_eq!(err.raw_payload(), Some(raw));
        }
    }

    #[test]
    fn test_custom_device_id_field() {
        let validated = MessageValidator::new("device")
            .parse(br#"{"device":"node-7","t":21.5}"#)
            .unwrap();
        assert_eq!(validated.device_id, "node-7");
    }
}
