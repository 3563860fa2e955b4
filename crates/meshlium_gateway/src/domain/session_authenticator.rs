use chrono::{DateTime, Utc};
use common::domain::{DomainError, LogRecord, PlatformReporter, NO_CLIENT_ID};
use std::sync::Arc;
use tracing::{debug, warn};

/// The single configured username/password pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Returns `None` unless both parts are present and non-empty.
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Self {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            _ => None,
        }
    }

    fn matches(&self, username: Option<&str>, password: Option<&str>) -> bool {
        self.username == username.unwrap_or_default() && self.password == password.unwrap_or_default()
    }
}

/// One authenticated transport connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub client_id: String,
    pub authenticated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            authenticated_at: Utc::now(),
        }
    }
}

/// Accepts or denies connections against the configured credential pair.
pub struct SessionAuthenticator {
    credentials: Option<Credentials>,
    reporter: Arc<dyn PlatformReporter>,
}

impl SessionAuthenticator {
    pub fn new(credentials: Option<Credentials>, reporter: Arc<dyn PlatformReporter>) -> Self {
        Self {
            credentials,
            reporter,
        }
    }

    pub fn requires_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub async fn authenticate(
        &self,
        client_id: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
    ) -> bool {
        let Some(credentials) = &self.credentials else {
            return true;
        };

        if credentials.matches(username, password) {
            debug!(client_id = client_id.unwrap_or(NO_CLIENT_ID), "client authenticated");
            return true;
        }

        let failure = DomainError::AuthenticationFailure {
            client_id: client_id.unwrap_or(NO_CLIENT_ID).to_string(),
        };
        warn!(error = %failure, "connection denied");
        self.reporter
            .log(LogRecord::authentication_failed(client_id))
            .await;
        false
    }
}
