//! Conversation log persistence.

use super::model::{ChatMessage, ChatMessageRole, SheetContext};
use crate::error::Result;
use crate::store::PostgrestClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

pub const CONVERSATION_TABLE: &str = "conversation_messages";

#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn log_messages(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        sheet_context: &SheetContext,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationRow {
    pub session_id: String,
    pub message_id: String,
    pub role: ChatMessageRole,
    pub content: String,
    pub sheet_context: serde_json::Value,
}

impl ConversationRow {
    fn new(session_id: &str, message: &ChatMessage, sheet_context: &serde_json::Value) -> Self {
        Self {
            session_id: session_id.to_string(),
            message_id: message.id.clone(),
            role: message.role,
            content: message.content.clone(),
            sheet_context: sheet_context.clone(),
        }
    }
}

/// Writes to the `conversation_messages` table through PostgREST.
pub struct ConversationLogger {
    client: Arc<PostgrestClient>,
    table: String,
}

impl ConversationLogger {
    pub fn new(client: Arc<PostgrestClient>, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }
}

#[async_trait]
impl ConversationLog for ConversationLogger {
    async fn log_messages(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        sheet_context: &SheetContext,
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let context = serde_json::to_value(sheet_context).unwrap_or_default();
        let rows: Vec<ConversationRow> = messages
            .iter()
            .map(|m| ConversationRow::new(session_id, m, &context))
            .collect();
        self.client
            .insert(&self.table, &rows, Some("session_id,message_id"))
            .await
    }
}

/// Keeps logged rows in memory.
#[derive(Default)]
pub struct InMemoryConversationLog {
    rows: Mutex<Vec<ConversationRow>>,
}

impl InMemoryConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<ConversationRow> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl ConversationLog for InMemoryConversationLog {
    async fn log_messages(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        sheet_context: &SheetContext,
    ) -> Result<()> {
        let context = serde_json::to_value(sheet_context).unwrap_or_default();
        self.rows.lock().extend(
            messages
                .iter()
                .map(|m| ConversationRow::new(session_id, m, &context)),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_log_records_rows() {
        let log = InMemoryConversationLog::new();
        let context = SheetContext {
            sheet_name: Some("Model".into()),
            ..Default::default()
        };
        log.log_messages("s1", &[ChatMessage::user("hi")], &context)
            .await
            .unwrap();

        let rows = log.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].session_id, "s1");
        assert_eq!(rows[0].role, ChatMessageRole::User);
        assert_eq!(rows[0].sheet_context["sheetName"], "Model");
    }

    #[test]
    fn row_serializes_role_lowercase() {
        let row = ConversationRow::new(
            "s",
            &ChatMessage {
                id: "m".into(),
                role: ChatMessageRole::Assistant,
                content: "ok".into(),
            },
            &serde_json::Value::Null,
        );
        assert_eq!(serde_json::to_value(row).unwrap()["role"], "assistant");
    }
}
