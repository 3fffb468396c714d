//! Access tokens for the Sheets API.
//!
//! The credentials source is picked once when the client is built; call
//! sites only ever ask the provider for a bearer token.

use crate::error::{ManglerError, Result, Upstream};
use crate::transport::{CallFailure, send_checked};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsSource {
    /// Pre-issued bearer token, used as-is
    AccessToken(String),
    /// Cached OAuth user token file carrying a refresh token
    AuthorizedUser(PathBuf),
    /// Token for the attached service account from the compute metadata server
    MetadataServer,
}

impl CredentialsSource {
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialsSource::AccessToken(_) => "access_token",
            CredentialsSource::AuthorizedUser(_) => "authorized_user",
            CredentialsSource::MetadataServer => "metadata_server",
        }
    }
}

/// Both the token cache written by installed-app flows and gcloud's
/// `authorized_user` file deserialize into this.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUserFile {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expiry: Option<String>,
}

impl AuthorizedUserFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ManglerError::Configuration(format!(
                "failed to read credentials file {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            ManglerError::Configuration(format!(
                "credentials file {} is not an authorized user token: {e}",
                path.display()
            ))
        })
    }

    /// The stored access token, if it is still comfortably valid.
    fn cached_token(&self) -> Option<CachedToken> {
        let token = self.token.as_ref()?;
        let expiry = DateTime::parse_from_rfc3339(self.expiry.as_deref()?).ok()?;
        let remaining = expiry.with_timezone(&Utc) - Utc::now();
        let remaining = remaining.to_std().ok()?;
        Some(CachedToken {
            value: token.clone(),
            expires_at: Instant::now() + remaining,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at > Instant::now() + EXPIRY_MARGIN
    }
}

enum Strategy {
    Static(String),
    Refresh(AuthorizedUserFile),
    Metadata { url: String },
}

pub struct TokenProvider {
    strategy: Strategy,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider").finish_non_exhaustive()
    }
}

impl TokenProvider {
    pub fn new(source: &CredentialsSource, http: reqwest::Client) -> Result<Self> {
        let (strategy, cached) = match source {
            CredentialsSource::AccessToken(token) => {
                if token.trim().is_empty() {
                    return Err(ManglerError::Configuration(
                        "access token must not be empty".into(),
                    ));
                }
                (Strategy::Static(token.trim().to_string()), None)
            }
            CredentialsSource::AuthorizedUser(path) => {
                let file = AuthorizedUserFile::load(path)?;
                let cached = file.cached_token();
                (Strategy::Refresh(file), cached)
            }
            CredentialsSource::MetadataServer => (
                Strategy::Metadata {
                    url: METADATA_TOKEN_URL.to_string(),
                },
                None,
            ),
        };
        Ok(Self {
            strategy,
            http,
            cached: Mutex::new(cached),
        })
    }

    /// Point the metadata strategy at a different endpoint.
    pub fn with_metadata_url(mut self, url: impl Into<String>) -> Self {
        if let Strategy::Metadata { url: current } = &mut self.strategy {
            *current = url.into();
        }
        self
    }

    pub async fn bearer_token(&self) -> Result<String> {
        if let Strategy::Static(token) = &self.strategy {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let fresh = self.fetch_token().await?;
        tracing::debug!(
            expires_in_secs = fresh
                .expires_at
                .saturating_duration_since(Instant::now())
                .as_secs(),
            "refreshed sheets access token"
        );
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let request = match &self.strategy {
            Strategy::Static(_) => unreachable!("static tokens never refresh"),
            Strategy::Refresh(file) => self
                .http
                .post(file.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI))
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("client_id", file.client_id.as_str()),
                    ("client_secret", file.client_secret.as_str()),
                    ("refresh_token", file.refresh_token.as_str()),
                ]),
            Strategy::Metadata { url } => self.http.get(url).header("Metadata-Flavor", "Google"),
        };

        let response = send_checked(request, true)
            .await
            .map_err(|f| f.into_transport(Upstream::OAuth))?;
        let body: TokenResponse = response.json().await.map_err(|e| {
            CallFailure::from_reqwest(&e, true).into_transport(Upstream::OAuth)
        })?;

        Ok(CachedToken {
            value: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in.unwrap_or(3600)),
        })
    }
}
