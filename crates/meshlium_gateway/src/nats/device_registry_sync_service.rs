use crate::domain::DeviceRegistry;
use common::domain::{Device, DeviceRegistryEvent, DomainError, DomainResult};
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, error};

#[derive(Deserialize)]
struct RemovedDevice {
    #[serde(alias = "_id")]
    id: String,
}

/// Decodes a registry event from a `*.added` / `*.removed` subject.
pub fn parse_registry_event(subject: &str, payload: &[u8]) -> DomainResult<DeviceRegistryEvent> {
    let kind = subject.rsplit('.').next().unwrap_or_default();
    let invalid = |e: serde_json::Error| DomainError::InvalidDevice(e.to_string());

    match kind {
        "added" => {
            let device: Device = serde_json::from_slice(payload).map_err(invalid)?;
            device.validate()?;
            Ok(DeviceRegistryEvent::Added { device })
        }
        "removed" => {
            let removed: RemovedDevice = serde_json::from_slice(payload).map_err(invalid)?;
            if removed.id.trim().is_empty() {
                return Err(DomainError::InvalidDevice("empty device id".to_string()));
            }
            Ok(DeviceRegistryEvent::Removed { device_id: removed.id })
        }
        other => Err(DomainError::InvalidDevice(format!(
            "unsupported registry event '{}'",
            other
        ))),
    }
}

/// Tower service applying platform add/remove events to the device cache.
#[derive(Clone)]
pub struct DeviceRegistrySyncService {
    registry: Arc<DeviceRegistry>,
}

impl DeviceRegistrySyncService {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }
}

impl Service<ConsumeRequest> for DeviceRegistrySyncService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let registry = Arc::clone(&self.registry);

        Box::pin(async move {
            let event = match parse_registry_event(&req.subject, &req.payload) {
                Ok(event) => event,
                Err(e) => {
                    error!(
                        subject = %req.subject,
                        error = %e,
                        "failed to parse device registry event"
                    );
                    return Ok(ConsumeResponse::Nak(Some(format!("parse error: {}", e))));
                }
            };

            debug!(
                device_id = %event.device_id(),
                subject = %req.subject,
                "applying device registry event"
            );

            match event {
                DeviceRegistryEvent::Added { device } => {
                    if let Err(e) = registry.add(device) {
                        return Ok(ConsumeResponse::Nak(Some(format!("registry error: {}", e))));
                    }
                }
                DeviceRegistryEvent::Removed { device_id } => registry.remove(&device_id),
            }

            Ok(ConsumeResponse::Ack)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{MockDeviceInfoRequester, MockDeviceStateRepository};
    use std::time::Duration;

    fn registry() -> Arc<DeviceRegistry> {
        Arc::new(DeviceRegistry::new(
            Arc::new(MockDeviceInfoRequester::new()),
            Arc::new(MockDeviceStateRepository::new()),
            Duration::from_millis(5000),
        ))
    }

    #[test]
    fn test_parse_added_event() {
        let event =
            parse_registry_event("meshlium.devices.added", br#"{"_id": "AGP_1"}"#).unwrap();
        assert_eq!(event.device_id(), "AGP_1");
        assert!(matches!(event, DeviceRegistryEvent::Added { .. }));
    }

    #[test]
    fn test_parse_removed_event() {
        let event = parse_registry_event("meshlium.devices.removed", br#"{"id": "AGP_1"}"#).unwrap();
        assert_eq!(
            event,
            DeviceRegistryEvent::Removed {
                device_id: "AGP_1".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_kind_and_blank_ids() {
        assert!(parse_registry_event("meshlium.devices.renamed", br#"{"id": "AGP_1"}"#).is_err());
        assert!(parse_registry_event("meshlium.devices.removed", br#"{"id": " "}"#).is_err());
        assert!(parse_registry_event("meshlium.devices.added", b"garbage").is_err());
    }

    #[tokio::test]
    async fn test_added_then_removed_updates_cache() {
        let registry = registry();
        let mut service = DeviceRegistrySyncService::new(Arc::clone(&registry));

        let response = service
            .call(ConsumeRequest::new(
                "meshlium.devices.added",
                r#"{"_id": "AGP_1"}"#,
                None,
            ))
            .await
            .unwrap();
        assert!(response.is_ack());
        assert!(registry.is_known("AGP_1"));

        let response = service
            .call(ConsumeRequest::new(
                "meshlium.devices.removed",
                r#"{"_id": "AGP_1"}"#,
                None,
            ))
            .await
            .unwrap();
        assert!(response.is_ack());
        assert!(!registry.is_known("AGP_1"));
    }

    #[tokio::test]
    async fn test_malformed_event_is_nakked() {
        let mut service = DeviceRegistrySyncService::new(registry());

        let response = service
            .call(ConsumeRequest::new("meshlium.devices.added", "{", None))
            .await
            .unwrap();

        assert!(matches!(response, ConsumeResponse::Nak(Some(_))));
    }
}
