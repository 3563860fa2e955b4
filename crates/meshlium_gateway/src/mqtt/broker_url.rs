use common::domain::{DomainError, DomainResult};

pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Splits `mqtt://host:port`, `tcp://host:port` or `host[:port]` into host and port.
pub fn parse_broker_url(url: &str) -> DomainResult<(&str, u16)> {
    let address = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url)
        .trim_end_matches('/');

    let (host, port) = match address.split_once(':') {
        None => (address, DEFAULT_MQTT_PORT),
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                DomainError::InvalidGatewayConfig(format!("Invalid port in broker URL: {}", url))
            })?;
            (host, port)
        }
    };

    if host.is_empty() {
        return Err(DomainError::InvalidGatewayConfig(format!(
            "Invalid broker URL format: {}",
            url
        )));
    }

    Ok((host, port))
}
