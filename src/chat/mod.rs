//! Chat sessions proxied to an LLM backend.

pub mod backend;
pub mod log;
pub mod memory;
pub mod model;
pub mod service;

pub use backend::{ChatBackend, HttpChatBackend};
pub use log::{ConversationLog, ConversationLogger, InMemoryConversationLog};
pub use memory::ConversationStore;
pub use model::{
    ChatMessage, ChatMessageRole, ChatRequest, ChatResponse, SheetContext, SimpleChatRequest,
};
pub use service::ChatService;
