use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Renders raw payload bytes for diagnostics without failing on invalid UTF-8.
pub fn display_raw(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Authentication failed on client: {client_id}")]
    AuthenticationFailure { client_id: String },

    #[error(
        "Invalid data sent. Data must be a valid JSON String with at least an \"{field}\" field \
         which corresponds to a registered Device ID. Reason: {reason}. Raw Data: {}",
        display_raw(.raw)
    )]
    PayloadParseError {
        field: String,
        reason: String,
        raw: Vec<u8>,
    },

    #[error(
        "Invalid data sent. Data must be a valid JSON String with at least an \"{field}\" field \
         which corresponds to a registered Device ID. Raw Data: {}",
        display_raw(.raw)
    )]
    MissingDeviceId { field: String, raw: Vec<u8> },

    #[error("Unauthorized device: {0}")]
    UnauthorizedDevice(String),

    #[error("Device is not cached: {0}")]
    UnknownDevice(String),

    #[error("Invalid device record: {0}")]
    InvalidDevice(String),

    #[error("Failed to forward reading for device {device_id}: {source}")]
    ForwardError {
        device_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Transport failure: {0}")]
    TransportFatal(String),

    #[error("Message pipeline fault: {0}")]
    PipelineFault(String),

    #[error("Invalid gateway configuration: {0}")]
    InvalidGatewayConfig(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    /// Raw payload carried by validation errors, if any.
    pub fn raw_payload(&self) -> Option<&[u8]> {
        match self {
            DomainError::PayloadParseError { raw, .. } | DomainError::MissingDeviceId { raw, .. } => {
                Some(raw)
            }
            _ => None,
        }
    }
}
