use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Gateway
    /// Topic whose messages are ingested
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Payload field naming the originating device
    #[serde(default = "default_device_id_field")]
    pub device_id_field: String,

    /// Broker credentials; enforced only when both are set
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_resolution_timeout_ms")]
    pub resolution_timeout_ms: u64,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Comma-separated device ids treated as authorized from startup
    #[serde(default)]
    pub known_devices: String,

    // MQTT
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    #[serde(default = "default_mqtt_max_retry_attempts")]
    pub mqtt_max_retry_attempts: u32,

    #[serde(default = "default_mqtt_retry_delay_secs")]
    pub mqtt_retry_delay_secs: u64,

    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    /// Subscribe to `$SYS` client presence topics
    #[serde(default)]
    pub sys_topics_enabled: bool,

    // HTTP auth hook
    #[serde(default = "default_auth_hook_enabled")]
    pub auth_hook_enabled: bool,

    #[serde(default = "default_auth_hook_host")]
    pub auth_hook_host: String,

    #[serde(default = "default_auth_hook_port")]
    pub auth_hook_port: u16,

    // NATS
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Core NATS subject prefix for device info requests
    #[serde(default = "default_nats_device_info_subject")]
    pub nats_device_info_subject: String,

    #[serde(default = "default_nats_device_state_stream")]
    pub nats_device_state_stream: String,

    #[serde(default = "default_nats_readings_stream")]
    pub nats_readings_stream: String,

    /// Stream carrying `devices.added` / `devices.removed` events
    #[serde(default = "default_nats_devices_stream")]
    pub nats_devices_stream: String,

    #[serde(default = "default_nats_devices_consumer_name")]
    pub nats_devices_consumer_name: String,

    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // OpenTelemetry
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_topic() -> String {
    "meshlium".to_string()
}

fn default_device_id_field() -> String {
    "id_wasp".to_string()
}

fn default_resolution_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_mqtt_client_id() -> String {
    "meshlium-gateway".to_string()
}

fn default_mqtt_max_retry_attempts() -> u32 {
    3
}

fn default_mqtt_retry_delay_secs() -> u64 {
    10
}

fn default_mqtt_keep_alive_secs() -> u64 {
    30
}

fn default_auth_hook_enabled() -> bool {
    true
}

fn default_auth_hook_host() -> String {
    "0.0.0.0".to_string()
}

fn default_auth_hook_port() -> u16 {
    8080
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_device_info_subject() -> String {
    "meshlium.device_info".to_string()
}

fn default_nats_device_state_stream() -> String {
    "device_state".to_string()
}

fn default_nats_readings_stream() -> String {
    "meshlium_readings".to_string()
}

fn default_nats_devices_stream() -> String {
    "devices".to_string()
}

fn default_nats_devices_consumer_name() -> String {
    "meshlium-gateway-devices".to_string()
}

fn default_nats_batch_size() -> usize {
    10
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_startup_timeout_secs() -> u64 {
    10
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "meshlium-gateway".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("MESHLIUM"))
            .build()?
            .try_deserialize()
    }

    pub fn known_device_ids(&self) -> Vec<String> {
        self.known_devices
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
