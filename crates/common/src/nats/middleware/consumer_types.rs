use async_nats::HeaderMap;
use bytes::Bytes;

/// Owned copy of a consumed NATS message passed through the tower stack.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub subject: String,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
}

impl ConsumeRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>, headers: Option<HeaderMap>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(name))
            .map(|value| value.as_str())
    }

    /// Last token of the subject, e.g. the device id in `devices.added.AGP_1`.
    pub fn subject_suffix(&self) -> &str {
        self.subject.rsplit('.').next().unwrap_or_default()
    }
}

/// Whether a consumed message is acknowledged or handed back for redelivery.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeResponse {
    Ack,
    Nak(Option<String>),
}

impl ConsumeResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(Some(reason.into()))
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }
}
