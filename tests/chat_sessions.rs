mod support;

use assert_matches::assert_matches;
use sheet_mangler::chat::{ChatMessageRole, ChatRequest, SheetContext};
use sheet_mangler::error::ManglerError;
use support::{Harness, message};

fn request(ids: &[(&str, ChatMessageRole)], session: Option<&str>) -> ChatRequest {
    ChatRequest {
        messages: ids.iter().map(|(id, role)| message(id, *role)).collect(),
        sheet_context: SheetContext {
            sheet_name: Some("Model".into()),
            ..Default::default()
        },
        session_id: session.map(str::to_string),
    }
}

#[tokio::test]
async fn resent_history_is_logged_once() {
    let h = Harness::new();
    let chat = h.state.chat();

    let first = chat
        .chat(request(&[("u1", ChatMessageRole::User)], Some("s1")))
        .await
        .unwrap();
    assert_eq!(first.messages[0].id, "a1");
    assert_eq!(h.log.rows().len(), 2);

    chat.chat(request(
        &[
            ("u1", ChatMessageRole::User),
            ("a1", ChatMessageRole::Assistant),
            ("u2", ChatMessageRole::User),
        ],
        Some("s1"),
    ))
    .await
    .unwrap();

    let rows = h.log.rows();
    let logged: Vec<&str> = rows.iter().map(|r| r.message_id.as_str()).collect();
    assert_eq!(logged, ["u1", "a1", "u2", "a2"]);
    assert!(rows.iter().all(|r| r.session_id == "s1"));
    assert_eq!(rows[0].sheet_context["sheetName"], "Model");
    assert_eq!(chat.store().history("s1").len(), 4);
}

#[tokio::test]
async fn unchanged_history_logs_only_the_new_reply() {
    let h = Harness::new();
    let chat = h.state.chat();
    chat.chat(request(&[("u1", ChatMessageRole::User)], Some("s3")))
        .await
        .unwrap();
    let resent = chat
        .chat(request(
            &[("u1", ChatMessageRole::User), ("a1", ChatMessageRole::Assistant)],
            Some("s3"),
        ))
        .await
        .unwrap();
    assert_eq!(resent.messages[0].id, "a2");

    let rows = h.log.rows();
    let logged: Vec<&str> = rows.iter().map(|r| r.message_id.as_str()).collect();
    assert_eq!(logged, ["u1", "a1", "a2"]);
    assert_eq!(chat.store().history("s3").len(), 3);
}

#[tokio::test]
async fn requests_without_session_are_not_recorded() {
    let h = Harness::new();
    let chat = h.state.chat();

    let response = chat
        .chat(request(&[("u1", ChatMessageRole::User)], None))
        .await
        .unwrap();
    assert_eq!(response.messages.len(), 1);

    chat.chat(request(&[("u2", ChatMessageRole::User)], Some("   ")))
        .await
        .unwrap();

    assert!(h.log.rows().is_empty());
    assert_eq!(chat.store().active_sessions(), 0);
    assert_eq!(h.backend.requests().len(), 2);
}

#[tokio::test]
async fn simple_chat_replays_stored_history() {
    let h = Harness::new();
    let chat = h.state.chat();

    chat.simple_chat("s2", "first question", None).await.unwrap();
    chat.simple_chat(" s2 ", "second question", None)
        .await
        .unwrap();

    let sent = h.backend.requests();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].messages.len(), 1);
    assert_eq!(sent[1].messages.len(), 3);
    assert_eq!(sent[1].messages[0].content, "first question");
    assert_eq!(sent[1].messages[1].id, "a1");
    assert_eq!(sent[1].messages[2].content, "second question");
    assert_eq!(sent[1].session_id.as_deref(), Some("s2"));

    assert_eq!(chat.store().history("s2").len(), 4);
    assert_eq!(h.log.rows().len(), 4);
}

#[tokio::test]
async fn simple_chat_requires_a_session() {
    let h = Harness::new();
    let err = h
        .state
        .chat()
        .simple_chat("  ", "hello", None)
        .await
        .unwrap_err();
    assert_matches!(err, ManglerError::InvalidInput(_));
    assert!(h.backend.requests().is_empty());
}
