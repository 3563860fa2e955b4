pub mod domain;
pub mod http;
pub mod meshlium_gateway;
pub mod mqtt;
pub mod nats;

pub use domain::*;
