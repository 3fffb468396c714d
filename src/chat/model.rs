use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChatMessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatMessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: ChatMessageRole::User,
            content: content.into(),
        }
    }
}

/// What the caller is looking at. Unknown keys are passed through to the
/// backend untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spreadsheet_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_range: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub sheet_context: SheetContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ChatRequest {
    /// Session id, if one was given and is not blank.
    pub fn session(&self) -> Option<&str> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleChatRequest {
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub sheet_context: Option<SheetContext>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn request_uses_camel_case() {
        let request: ChatRequest = serde_json::from_value(json!({
            "messages": [{"id": "m1", "role": "user", "content": "hi"}],
            "sheetContext": {"sheetName": "Model", "activeCell": "B2"},
            "sessionId": "s1"
        }))
        .unwrap();
        assert_eq!(request.session(), Some("s1"));
        assert_eq!(request.sheet_context.sheet_name.as_deref(), Some("Model"));
        assert_eq!(request.sheet_context.extra["activeCell"], "B2");

        let round = serde_json::to_value(&request).unwrap();
        assert_eq!(round["sheetContext"]["activeCell"], "B2");
        assert_eq!(round["sessionId"], "s1");
    }

    #[test]
    fn blank_session_is_none() {
        let request = ChatRequest {
            messages: vec![],
            sheet_context: SheetContext::default(),
            session_id: Some("  ".into()),
        };
        assert_eq!(request.session(), None);
    }

    #[test]
    fn roles_round_trip_as_lowercase() {
        assert_eq!(ChatMessageRole::Assistant.to_string(), "assistant");
        assert_eq!(
            ChatMessageRole::from_str("system").unwrap(),
            ChatMessageRole::System
        );
        let user = ChatMessage::user("hello");
        assert_eq!(serde_json::to_value(&user).unwrap()["role"], "user");
    }
}
