use super::model::{ChatRequest, ChatResponse};
use crate::error::{ManglerError, Result, Upstream};
use crate::recovery::{ExponentialBackoff, RetryConfig, retry_async_with_policy};
use crate::transport::{CallFailure, build_http_client, send_checked};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Returns only the messages produced for this turn.
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// Chat backend reached over HTTP: POST the request JSON, read back
/// `{"messages": [...]}`.
pub struct HttpChatBackend {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    retry: ExponentialBackoff,
}

impl std::fmt::Debug for HttpChatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChatBackend").finish_non_exhaustive()
    }
}

impl HttpChatBackend {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let url = url.into().trim().to_string();
        if url.is_empty() {
            return Err(ManglerError::Configuration(
                "chat backend URL is required".into(),
            ));
        }
        Ok(Self {
            http: build_http_client(timeout)?,
            url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            retry: ExponentialBackoff::new(retry),
        })
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    #[instrument(skip(self, request), fields(messages = request.messages.len()))]
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let response: ChatResponse = retry_async_with_policy(
            || async {
                let mut builder = self.http.post(&self.url).json(request);
                if let Some(key) = &self.api_key {
                    builder = builder.bearer_auth(key);
                }
                // A completed generation is not repeated after an ambiguous failure.
                let response = send_checked(builder, false)
                    .await
                    .map_err(|f| f.into_transport(Upstream::ChatBackend))?;
                response.json::<ChatResponse>().await.map_err(|e| {
                    CallFailure::from_reqwest(&e, false).into_transport(Upstream::ChatBackend)
                })
            },
            &self.retry,
            "chat.send",
        )
        .await?;
        debug!(replies = response.messages.len(), "chat backend replied");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn requires_url() {
        assert_matches!(
            HttpChatBackend::new(" ", None, Duration::from_secs(1), RetryConfig::none()),
            Err(ManglerError::Configuration(_))
        );
    }

    #[test]
    fn blank_api_key_is_dropped() {
        let backend = HttpChatBackend::new(
            "http://localhost:9000/chat",
            Some("  ".into()),
            Duration::from_secs(1),
            RetryConfig::none(),
        )
        .unwrap();
        assert!(backend.api_key.is_none());
    }
}
