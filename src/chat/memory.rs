//! Bounded per-session conversation history.

use super::model::ChatMessage;
use indexmap::IndexSet;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use tracing::debug;

pub const DEFAULT_SESSION_CAPACITY: usize = 256;
pub const DEFAULT_MAX_MESSAGES: usize = 500;

/// Ids remembered per session, as a multiple of the message cap. Keeping
/// more ids than messages stops a client that resends its full history from
/// re-logging messages that already aged out of the window.
const SEEN_IDS_FACTOR: usize = 4;

#[derive(Debug, Default)]
struct Session {
    messages: VecDeque<ChatMessage>,
    seen: IndexSet<String>,
}

impl Session {
    fn push(&mut self, message: ChatMessage, max_messages: usize) {
        self.seen.insert(message.id.clone());
        while self.seen.len() > max_messages * SEEN_IDS_FACTOR {
            self.seen.shift_remove_index(0);
        }
        self.messages.push_back(message);
        while self.messages.len() > max_messages {
            self.messages.pop_front();
        }
    }
}

pub struct ConversationStore {
    sessions: Mutex<LruCache<String, Session>>,
    max_messages: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY, DEFAULT_MAX_MESSAGES)
    }
}

impl ConversationStore {
    pub fn new(capacity: usize, max_messages: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
            max_messages: max_messages.max(1),
        }
    }

    /// Current history, oldest first. Empty for unknown sessions.
    pub fn history(&self, session_id: &str) -> Vec<ChatMessage> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|s| s.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Append request messages whose ids the session has not seen, then the
    /// response messages. Returns exactly what was appended.
    pub fn record_turn(
        &self,
        session_id: &str,
        request: &[ChatMessage],
        response: &[ChatMessage],
    ) -> Vec<ChatMessage> {
        let mut sessions = self.sessions.lock();
        let session = self.session_mut(&mut sessions, session_id);
        let mut appended: Vec<ChatMessage> = Vec::new();
        for message in request {
            let repeated_in_turn = appended.iter().any(|m| m.id == message.id);
            if !session.seen.contains(&message.id) && !repeated_in_turn {
                appended.push(message.clone());
            }
        }
        appended.extend(response.iter().cloned());
        for message in &appended {
            session.push(message.clone(), self.max_messages);
        }
        appended
    }

    /// Append messages the service authored itself; no diffing.
    pub fn append(&self, session_id: &str, messages: &[ChatMessage]) {
        let mut sessions = self.sessions.lock();
        let session = self.session_mut(&mut sessions, session_id);
        for message in messages {
            session.push(message.clone(), self.max_messages);
        }
    }

    fn session_mut<'a>(
        &self,
        sessions: &'a mut LruCache<String, Session>,
        session_id: &str,
    ) -> &'a mut Session {
        if !sessions.contains(session_id) {
            if let Some((evicted, _)) = sessions.push(session_id.to_string(), Session::default()) {
                debug!(session_id = %evicted, "evicted least recently used chat session");
            }
        }
        sessions.get_or_insert_mut(session_id.to_string(), Session::default)
    }
}
