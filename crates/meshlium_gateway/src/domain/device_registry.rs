use chrono::{DateTime, Utc};
use common::domain::{
    Device, DeviceInfoRequest, DeviceInfoRequester, DeviceState, DeviceStateRepository,
    DomainError, DomainResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

/// Outcome of [`DeviceRegistry::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Authorized(Device),
    Unauthorized,
}

impl Resolution {
    fn from_device(device: Option<Device>) -> Self {
        match device {
            Some(device) if device.authorized => Resolution::Authorized(device),
            _ => Resolution::Unauthorized,
        }
    }
}

/// One outstanding remote lookup.
#[derive(Debug)]
pub struct PendingResolution {
    pub device_id: String,
    pub issued_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    responder: oneshot::Sender<Option<Device>>,
}

#[derive(Default)]
struct RegistryState {
    devices: HashMap<String, Device>,
    pending: HashMap<String, PendingResolution>,
}

/// Cache of known devices plus the correlation table for remote lookups.
///
/// Both maps sit behind one mutex and are never held across an await. A
/// pending entry is removed under that lock by whichever of reply or timeout
/// gets there first; the other side finds nothing and does nothing.
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
    requester: Arc<dyn DeviceInfoRequester>,
    state_repository: Arc<dyn DeviceStateRepository>,
    resolution_timeout: Duration,
}

impl DeviceRegistry {
    pub fn new(
        requester: Arc<dyn DeviceInfoRequester>,
        state_repository: Arc<dyn DeviceStateRepository>,
        resolution_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            requester,
            state_repository,
            resolution_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_known(&self, device_id: &str) -> bool {
        self.lock().devices.contains_key(device_id)
    }

    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.lock().devices.get(device_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Inserts or replaces `device`; the cached state is kept on replace.
    pub fn add(&self, device: Device) -> DomainResult<()> {
        device.validate()?;

        let mut state = self.lock();
        match state.devices.get_mut(&device.id) {
            Some(existing) => existing.authorized = device.authorized,
            None => {
                debug!(device_id = %device.id, "device added to registry");
                state.devices.insert(device.id.clone(), device);
            }
        }
        Ok(())
    }

    pub fn remove(&self, device_id: &str) {
        if self.lock().devices.remove(device_id).is_some() {
            debug!(device_id = %device_id, "device removed from registry");
        }
    }

    /// Answers from the cache, or asks the platform and waits up to the
    /// resolution timeout for the correlated reply.
    #[instrument(skip(self), fields(device_id = %device_id))]
    pub async fn resolve(&self, device_id: &str) -> DomainResult<Resolution> {
        if let Some(device) = self.get(device_id) {
            return Ok(Resolution::from_device(Some(device)));
        }

        let correlation_id = xid::new().to_string();
        let (responder, mut reply) = oneshot::channel();
        let issued_at = Utc::now();
        let timeout_at = issued_at
            + chrono::Duration::milliseconds(self.resolution_timeout.as_millis() as i64);

        self.lock().pending.insert(
            correlation_id.clone(),
            PendingResolution {
                device_id: device_id.to_string(),
                issued_at,
                timeout_at,
                responder,
            },
        );
        // Evicts the entry if this future is dropped or the request fails.
        let _pending = PendingGuard {
            registry: self,
            correlation_id: &correlation_id,
        };

        debug!(correlation_id = %correlation_id, "device not cached, requesting device info");
        // The deadline covers the request itself as well as the reply.
        let lookup = async {
            self.requester
                .request_device_info(&DeviceInfoRequest {
                    device_id: device_id.to_string(),
                    correlation_id: correlation_id.clone(),
                })
                .await?;
            Ok::<_, DomainError>((&mut reply).await)
        };
        let outcome = tokio::time::timeout(self.resolution_timeout, lookup).await;

        match outcome {
            Ok(Ok(Ok(device))) => Ok(Resolution::from_device(device)),
            Ok(Ok(Err(_))) => Ok(Resolution::Unauthorized),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                if self.lock().pending.remove(&correlation_id).is_some() {
                    info!(
                        correlation_id = %correlation_id,
                        timeout_ms = self.resolution_timeout.as_millis() as u64,
                        "device info request timed out"
                    );
                    return Ok(Resolution::Unauthorized);
                }
                // A reply claimed the entry just as the timer fired; it has
                // already been sent, so this resolves immediately.
                Ok(Resolution::from_device(reply.await.ok().flatten()))
            }
        }
    }

    /// Delivers a platform reply. Returns false when no lookup is waiting
    /// for `correlation_id`, e.g. because it already timed out.
    pub fn complete_resolution(&self, correlation_id: &str, device: Option<Device>) -> bool {
        let mut state = self.lock();
        let Some(pending) = state.pending.remove(correlation_id) else {
            debug!(correlation_id = %correlation_id, "no pending resolution for reply, ignoring");
            return false;
        };

        let device = device.map(|mut device| {
            if device.id != pending.device_id {
                if !device.id.is_empty() {
                    warn!(
                        requested = %pending.device_id,
                        replied = %device.id,
                        "device info reply names a different device"
                    );
                }
                device.id = pending.device_id.clone();
            }
            device
        });

        let device = match device {
            Some(device) if device.authorized => Some(
                state
                    .devices
                    .entry(device.id.clone())
                    .or_insert(device)
                    .clone(),
            ),
            other => other,
        };

        // Sent while still holding the lock so a racing timeout always
        // finds the answer waiting.
        let _ = pending.responder.send(device);
        true
    }

    /// Applies `merge` to the cached state, persists the result and only then
    /// commits it to the cache.
    ///
    /// A failed save leaves the cache untouched. If another update committed
    /// while this one was saving, the merge is re-applied on top of it and
    /// saved again, so the last snapshot written is always the newest.
    pub async fn update_state<F>(&self, device_id: &str, merge: F) -> DomainResult<Device>
    where
        F: Fn(&DeviceState) -> DeviceState,
    {
        let mut base = self
            .get(device_id)
            .ok_or_else(|| DomainError::UnknownDevice(device_id.to_string()))?;

        loop {
            let next = merge(&base.state);

            self.state_repository
                .set_device_state(device_id, &next)
                .await?;

            let mut state = self.lock();
            let Some(cached) = state.devices.get_mut(device_id) else {
                debug!(device_id = %device_id, "device removed while its state was saved");
                base.state = next;
                return Ok(base);
            };

            if cached.state == base.state {
                cached.state = next;
                return Ok(cached.clone());
            }

            debug!(device_id = %device_id, "concurrent state update, re-applying reading");
            base = cached.clone();
        }
    }
}

struct PendingGuard<'a> {
    registry: &'a DeviceRegistry,
    correlation_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.lock().pending.remove(self.correlation_id);
    }
}
