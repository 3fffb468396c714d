//! Error handling for the sheet mangler service
//!
//! This module provides:
//! - The domain error enum shared by codecs, adapters and pipelines
//! - Error codes grouped into the caller-facing taxonomy
//! - HTTP mapping for axum handlers

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ManglerError>;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Caller-facing error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed cell, range, color, URL or payload
    InvalidInput,
    /// Missing sheet, gid or snapshot batch
    NotFound,
    /// Spreadsheet API or chat backend failure
    TransportError,
    /// Row store failure
    StoreUnavailable,
    /// Required endpoint or credential missing
    ConfigurationError,
}

impl ErrorCode {
    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "client_error",
            ErrorCode::NotFound => "resource_not_found",
            ErrorCode::TransportError => "upstream_error",
            ErrorCode::StoreUnavailable => "store_error",
            ErrorCode::ConfigurationError => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::TransportError => StatusCode::BAD_GATEWAY,
            ErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ConfigurationError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// DOMAIN ERROR
// =============================================================================

/// Which remote collaborator a transport error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Upstream {
    SheetsApi,
    ChatBackend,
    OAuth,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::SheetsApi => write!(f, "sheets api"),
            Upstream::ChatBackend => write!(f, "chat backend"),
            Upstream::OAuth => write!(f, "oauth"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ManglerError {
    #[error("invalid cell index: row {row}, column {column} (both must be >= 1)")]
    InvalidIndex { row: u32, column: u32 },

    #[error("invalid cell reference '{0}'")]
    InvalidReference(String),

    #[error("range '{0}' has inverted bounds")]
    InvertedRange(String),

    #[error("invalid hex color '{0}'")]
    InvalidColor(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    SheetNotFound(String),

    #[error("no snapshot rows found for batch '{0}'")]
    SnapshotNotFound(String),

    /// `transient` marks failures that are safe to retry for the call in flight
    #[error("{upstream} request failed: {message}")]
    Transport {
        upstream: Upstream,
        message: String,
        transient: bool,
    },

    #[error("snapshot store unavailable: {message}")]
    StoreUnavailable { message: String, transient: bool },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ManglerError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        ManglerError::InvalidInput(message.into())
    }

    pub fn transport(upstream: Upstream, message: impl Into<String>, transient: bool) -> Self {
        ManglerError::Transport {
            upstream,
            message: message.into(),
            transient,
        }
    }

    pub fn store(message: impl Into<String>, transient: bool) -> Self {
        ManglerError::StoreUnavailable {
            message: message.into(),
            transient,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ManglerError::InvalidIndex { .. }
            | ManglerError::InvalidReference(_)
            | ManglerError::InvertedRange(_)
            | ManglerError::InvalidColor(_)
            | ManglerError::InvalidInput(_) => ErrorCode::InvalidInput,
            ManglerError::SheetNotFound(_) | ManglerError::SnapshotNotFound(_) => {
                ErrorCode::NotFound
            }
            ManglerError::Transport { .. } => ErrorCode::TransportError,
            ManglerError::StoreUnavailable { .. } => ErrorCode::StoreUnavailable,
            ManglerError::Configuration(_) => ErrorCode::ConfigurationError,
        }
    }

    /// Whether retrying the exact same call cannot change the outcome of a completed one
    pub fn is_transient(&self) -> bool {
        match self {
            ManglerError::Transport { transient, .. }
            | ManglerError::StoreUnavailable { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Generate a unique error ID
    fn generate_error_id() -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        let timestamp = chrono::Utc::now().timestamp_millis();
        format!("err_{:x}_{:x}", timestamp, count)
    }

    /// Build the JSON body returned to HTTP callers
    pub fn to_body(&self) -> ErrorBody {
        let code = self.code();
        ErrorBody {
            error: ErrorDetail {
                code,
                category: code.category().to_string(),
                message: self.to_string(),
                error_id: Self::generate_error_id(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub category: String,
    pub message: String,
    pub error_id: String,
}

impl IntoResponse for ManglerError {
    fn into_response(self) -> Response {
        let status = self.code().status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = %self.code(), "request failed");
        } else {
            tracing::info!(error = %self, code = %self.code(), "request rejected");
        }
        (status, Json(self.to_body())).into_response()
    }
}
