mod device_registry;
mod forwarder;
mod gateway_config;
mod ingestion_service;
mod lifecycle_controller;
mod message_validator;
mod session_authenticator;
mod state_reconciler;
mod tracing_platform_reporter;
mod transport;

pub use device_registry::*;
pub use forwarder::*;
pub use gateway_config::*;
pub use ingestion_service::*;
pub use lifecycle_controller::*;
pub use message_validator::*;
pub use session_authenticator::*;
pub use state_reconciler::*;
pub use tracing_platform_reporter::*;
pub use transport::*;
