mod bridge;
mod broker_url;
mod sys_topic;

pub use bridge::*;
pub use broker_url::*;
pub use sys_topic::*;
