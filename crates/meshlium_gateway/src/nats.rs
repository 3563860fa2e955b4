mod device_info_reply_listener;
mod device_info_requester;
mod device_registry_sync_consumer;
mod device_registry_sync_service;
mod device_state_repository;
mod reading_producer;

pub use device_info_reply_listener::*;
pub use device_info_requester::*;
pub use device_registry_sync_consumer::*;
pub use device_registry_sync_service::*;
pub use device_state_repository::*;
pub use reading_producer::*;

/// Header carrying the correlation id of a device info exchange.
pub const CORRELATION_ID_HEADER: &str = "Meshlium-Correlation-Id";
