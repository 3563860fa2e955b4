use crate::domain::DeviceRegistry;
use common::domain::{Device, DeviceState, DomainResult, Reading};
use std::sync::Arc;
use tracing::debug;

/// Merges a reading into a device's current/previous snapshot.
pub struct StateReconciler {
    registry: Arc<DeviceRegistry>,
}

impl StateReconciler {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// The snapshot `reading` would produce on top of `state`.
    pub fn merge(state: &DeviceState, reading: &Reading) -> DeviceState {
        state.advance(reading.clone())
    }

    /// Applies [`Self::merge`] through the registry, which persists the result.
    pub async fn reconcile(&self, device: &Device, reading: &Reading) -> DomainResult<Device> {
        let updated = self
            .registry
            .update_state(&device.id, |state| Self::merge(state, reading))
            .await?;
        debug!(
            device_id = %updated.id,
            has_previous = updated.state.previous_reading.is_some(),
            "device state reconciled"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{MockDeviceInfoRequester, MockDeviceStateRepository};
    use serde_json::json;
    use std::time::Duration;

    fn reading(value: serde_json::Value) -> Reading {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_merge_is_pure() {
        let state = DeviceState::default();
        let merged = StateReconciler::merge(&state, &reading(json!({"id": "1"})));

        assert_eq!(merged.current_reading, Some(reading(json!({"id": "1"}))));
        assert_eq!(merged.previous_reading, None);
        assert_eq!(state, DeviceState::default());

        let merged_again = StateReconciler::merge(&merged, &reading(json!({"id": "2"})));
        assert_eq!(merged_again.previous_reading, Some(reading(json!({"id": "1"}))));
    }

    #[tokio::test]
    async fn test_reconcile_persists_snapshot() {
        let mut repository = MockDeviceStateRepository::new();
        repository
            .expect_set_device_state()
            .withf(|device_id: &str, state: &DeviceState| {
                device_id == "AGP_2"
                    && state
                        .current_reading
                        .as_ref()
                        .and_then(|r| r.string_field("id"))
                        == Some("15819")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let registry = Arc::new(DeviceRegistry::new(
            Arc::new(MockDeviceInfoRequester::new()),
            Arc::new(repository),
            Duration::from_millis(5000),
        ));
        registry.add(Device::new("AGP_2")).unwrap();
        let reconciler = StateReconciler::new(Arc::clone(&registry));

        let device = registry.get("AGP_2").unwrap();
        let updated = reconciler
            .reconcile(&device, &reading(json!({"id": "15819"})))
            .await
            .unwrap();

        assert_eq!(
            updated.state,
            StateReconciler::merge(&device.state, &reading(json!({"id": "15819"})))
        );
        assert_eq!(registry.get("AGP_2").unwrap().state, updated.state);
    }
}
