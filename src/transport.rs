//! Shared HTTP plumbing for the outbound REST clients.

use crate::error::{ManglerError, Upstream};
use reqwest::{Response, StatusCode};
use std::time::Duration;

const MAX_ERROR_BODY: usize = 512;

pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ManglerError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ManglerError::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Outcome of a failed outbound call before it is tagged with a collaborator.
///
/// `idempotent` calls may be retried on timeouts and 5xx responses. Other calls
/// only when the request never reached the server or was rate limited.
#[derive(Debug, Clone)]
pub struct CallFailure {
    pub message: String,
    pub transient: bool,
}

impl CallFailure {
    pub fn from_reqwest(err: &reqwest::Error, idempotent: bool) -> Self {
        let transient = err.is_connect() || (idempotent && err.is_timeout());
        let kind = if err.is_timeout() {
            "timed out"
        } else if err.is_connect() {
            "connection failed"
        } else if err.is_decode() {
            "invalid response body"
        } else {
            "request failed"
        };
        Self {
            message: format!("{kind}: {err}"),
            transient,
        }
    }

    pub async fn from_response(response: Response, idempotent: bool) -> Self {
        let status = response.status();
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Self {
            message: format!("status {status}: {body}"),
            transient: status_is_transient(status, idempotent),
        }
    }

    pub fn into_transport(self, upstream: Upstream) -> ManglerError {
        ManglerError::transport(upstream, self.message, self.transient)
    }

    pub fn into_store(self) -> ManglerError {
        ManglerError::store(self.message, self.transient)
    }
}

pub fn status_is_transient(status: StatusCode, idempotent: bool) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || (idempotent && status.is_server_error())
}

/// Send a prepared request and hand back the response only if it succeeded.
pub async fn send_checked(
    request: reqwest::RequestBuilder,
    idempotent: bool,
) -> Result<Response, CallFailure> {
    let response = request
        .send()
        .await
        .map_err(|e| CallFailure::from_reqwest(&e, idempotent))?;
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(CallFailure::from_response(response, idempotent).await)
    }
}
