use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but something needs attention
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The worse of the two.
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    pub fn healthy(details: serde_json::Value) -> Self {
        Self {
            status: HealthStatus::Healthy,
            error: None,
            details: Some(details),
        }
    }

    pub fn degraded(error: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            status: HealthStatus::Degraded,
            error: Some(error.into()),
            details: Some(details),
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            error: Some(error.into()),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: i64,
    pub version: String,
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        (self.status.status_code(), Json(self)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub status: HealthStatus,
    pub timestamp: i64,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl IntoResponse for ReadinessResponse {
    fn into_response(self) -> Response {
        let status = if self.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

/// Liveness and readiness for the HTTP surface. Readiness turns unhealthy
/// as soon as shutdown starts so load balancers stop routing new work.
#[derive(Clone)]
pub struct HealthChecker {
    state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl HealthChecker {
    pub fn new(state: Arc<AppState>, shutdown: CancellationToken) -> Self {
        Self { state, shutdown }
    }

    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            timestamp: now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn readiness(&self) -> ReadinessResponse {
        let mut components = BTreeMap::new();
        components.insert("lifecycle".to_string(), self.check_lifecycle());
        components.insert("configuration".to_string(), self.check_configuration());
        components.insert("chat_sessions".to_string(), self.check_chat_sessions());

        let status = components
            .values()
            .fold(HealthStatus::Healthy, |acc, c| acc.combine(c.status));

        ReadinessResponse {
            ready: status != HealthStatus::Unhealthy,
            status,
            timestamp: now(),
            components,
        }
    }

    fn check_lifecycle(&self) -> ComponentHealth {
        if self.shutdown.is_cancelled() {
            ComponentHealth::unhealthy("shutting down")
        } else {
            ComponentHealth::healthy(serde_json::json!({ "accepting": true }))
        }
    }

    /// Store, credentials and chat backend must all be configured.
    fn check_configuration(&self) -> ComponentHealth {
        let config = self.state.config();
        match config.validate() {
            Ok(()) => ComponentHealth::healthy(serde_json::json!({
                "credentials": config.credentials.as_ref().map(|c| c.kind()),
                "conversation_log": config.conversation_log_enabled,
            })),
            Err(e) => ComponentHealth::unhealthy(e.to_string()),
        }
    }

    /// Degraded when the session cache is full, since every new session
    /// then evicts an old one.
    fn check_chat_sessions(&self) -> ComponentHealth {
        let active = self.state.chat().store().active_sessions();
        let capacity = self.state.config().session_capacity;
        let details = serde_json::json!({ "active": active, "capacity": capacity });
        if active >= capacity {
            ComponentHealth::degraded("session cache at capacity", details)
        } else {
            ComponentHealth::healthy(details)
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.liveness()
}

pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    checker.readiness()
}
