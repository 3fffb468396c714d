use super::backend::ChatBackend;
use super::log::ConversationLog;
use super::memory::ConversationStore;
use super::model::{ChatMessage, ChatRequest, ChatResponse, SheetContext};
use crate::error::{ManglerError, Result};
use crate::logging::session_span;
use crate::metrics::METRICS;
use std::sync::Arc;
use tracing::{Instrument, debug};

/// Session memory and optional logging on top of a [`ChatBackend`].
pub struct ChatService {
    backend: Arc<dyn ChatBackend>,
    store: ConversationStore,
    log: Option<Arc<dyn ConversationLog>>,
}

impl ChatService {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: ConversationStore,
        log: Option<Arc<dyn ConversationLog>>,
    ) -> Self {
        Self {
            backend,
            store,
            log,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Forward a request that carries its own full history. With a session
    /// id, request messages not yet seen for that session plus the reply
    /// are recorded and logged.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let span = session_span(request.session().unwrap_or("-"));
        async move {
            let response = self.backend.send_chat(&request).await?;
            METRICS.record_chat_turn();

            if let Some(session_id) = request.session() {
                let recorded =
                    self.store
                        .record_turn(session_id, &request.messages, &response.messages);
                debug!(recorded = recorded.len(), "recorded chat turn");
                self.log_turn(session_id, &recorded, &request.sheet_context)
                    .await?;
                METRICS.set_active_sessions(self.store.active_sessions());
            }
            Ok(response)
        }
        .instrument(span)
        .await
    }

    /// Chat with only the newest user utterance; history comes from the store.
    pub async fn simple_chat(
        &self,
        session_id: &str,
        content: &str,
        sheet_context: Option<SheetContext>,
    ) -> Result<ChatResponse> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(ManglerError::invalid_input("sessionId must not be empty"));
        }
        async move {
            let user_message = ChatMessage::user(content);
            let mut messages = self.store.history(session_id);
            messages.push(user_message.clone());

            let request = ChatRequest {
                messages,
                sheet_context: sheet_context.unwrap_or_default(),
                session_id: Some(session_id.to_string()),
            };
            let response = self.backend.send_chat(&request).await?;
            METRICS.record_chat_turn();

            let mut recorded = Vec::with_capacity(response.messages.len() + 1);
            recorded.push(user_message);
            recorded.extend(response.messages.iter().cloned());
            self.store.append(session_id, &recorded);
            self.log_turn(session_id, &recorded, &request.sheet_context)
                .await?;
            METRICS.set_active_sessions(self.store.active_sessions());
            Ok(response)
        }
        .instrument(session_span(session_id))
        .await
    }

    async fn log_turn(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        sheet_context: &SheetContext,
    ) -> Result<()> {
        match &self.log {
            Some(log) if !messages.is_empty() => {
                log.log_messages(session_id, messages, sheet_context).await
            }
            _ => Ok(()),
        }
    }
}
