use crate::domain::{LifecycleState, TransportEvent, TransportEventSender};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::domain::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthHookConfig {
    pub host: String,
    pub port: u16,
}

impl Default for AuthHookConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl AuthHookConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Body posted by the broker's HTTP authentication plugin.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthRequest {
    #[serde(alias = "clientid", default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub result: String,
}

impl AuthResponse {
    fn from_decision(accepted: bool) -> Self {
        let result = if accepted { "allow" } else { "deny" };
        Self {
            result: result.to_string(),
        }
    }
}

#[derive(Clone)]
struct HookState {
    events: TransportEventSender,
    lifecycle: watch::Receiver<LifecycleState>,
}

pub fn auth_hook_router(
    events: TransportEventSender,
    lifecycle: watch::Receiver<LifecycleState>,
) -> Router {
    Router::new()
        .route("/mqtt/auth", post(authenticate))
        .route("/health", get(health))
        .with_state(HookState { events, lifecycle })
}

async fn authenticate(
    State(state): State<HookState>,
    Json(request): Json<AuthRequest>,
) -> Json<AuthResponse> {
    let (respond_to, decision) = oneshot::channel();
    let event = TransportEvent::Authenticate {
        client_id: request.client_id,
        username: request.username,
        password: request.password,
        respond_to,
    };

    if state.events.send(event).await.is_err() {
        warn!("ingestion service unavailable, denying connection");
        return Json(AuthResponse::from_decision(false));
    }

    Json(AuthResponse::from_decision(decision.await.unwrap_or(false)))
}

async fn health(State(state): State<HookState>) -> StatusCode {
    match *state.lifecycle.borrow() {
        LifecycleState::Running => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// HTTP endpoint the broker calls to authenticate connecting clients.
pub struct AuthHook {
    config: AuthHookConfig,
    router: Router,
}

impl AuthHook {
    pub fn new(
        config: AuthHookConfig,
        events: TransportEventSender,
        lifecycle: watch::Receiver<LifecycleState>,
    ) -> Self {
        Self {
            config,
            router: auth_hook_router(events, lifecycle),
        }
    }

    /// Serves until `shutdown` is cancelled. Failing to bind is fatal.
    pub async fn run(self, shutdown: CancellationToken) -> DomainResult<()> {
        let address = self.config.bind_address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            DomainError::TransportFatal(format!("failed to bind auth hook on {}: {}", address, e))
        })?;

        info!(address = %address, "auth hook listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| DomainError::TransportFatal(format!("auth hook server failed: {}", e)))?;

        debug!("auth hook stopped");
        Ok(())
    }
}
