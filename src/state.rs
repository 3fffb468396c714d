use crate::chat::{
    ChatBackend, ChatService, ConversationLog, ConversationLogger, ConversationStore,
    HttpChatBackend,
};
use crate::color::Palette;
use crate::config::ServerConfig;
use crate::error::{ManglerError, Result};
use crate::sheets::{GoogleSheetsClient, SheetsApi};
use crate::store::{PostgrestClient, PostgrestSnapshotStore, SnapshotStore};
use std::sync::Arc;
use tracing::info;

/// Everything a request handler needs, shared behind one `Arc`.
pub struct AppState {
    config: Arc<ServerConfig>,
    sheets: Arc<dyn SheetsApi>,
    store: Arc<dyn SnapshotStore>,
    chat: ChatService,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(
        config: Arc<ServerConfig>,
        sheets: Arc<dyn SheetsApi>,
        store: Arc<dyn SnapshotStore>,
        chat: ChatService,
    ) -> Self {
        Self {
            config,
            sheets,
            store,
            chat,
        }
    }

    /// Build the production collaborators: the Sheets client, the PostgREST
    /// snapshot store, the HTTP chat backend and, when enabled, the
    /// conversation logger sharing the store's client.
    pub fn from_config(config: Arc<ServerConfig>) -> Result<Self> {
        config.validate()?;
        let retry = config.retry_config();
        let timeout = config.request_timeout;

        let credentials = config.credentials.as_ref().ok_or_else(|| {
            ManglerError::Configuration("no Sheets credentials configured".into())
        })?;
        let sheets = GoogleSheetsClient::new(
            config.sheets_api_url.clone(),
            credentials,
            timeout,
            retry.clone(),
        )?;

        let postgrest = Arc::new(PostgrestClient::new(
            config.store_url.clone().unwrap_or_default(),
            config.store_key.clone().unwrap_or_default(),
            timeout,
            retry.clone(),
        )?);
        let store = PostgrestSnapshotStore::new(postgrest.clone(), config.snapshot_table.clone());

        let backend: Arc<dyn ChatBackend> = Arc::new(HttpChatBackend::new(
            config.chat_backend_url.clone().unwrap_or_default(),
            config.chat_api_key.clone(),
            timeout,
            retry,
        )?);
        let log: Option<Arc<dyn ConversationLog>> = config.conversation_log_enabled.then(|| {
            Arc::new(ConversationLogger::new(
                postgrest,
                config.conversation_table.clone(),
            )) as Arc<dyn ConversationLog>
        });
        let chat = ChatService::new(
            backend,
            ConversationStore::new(config.session_capacity, config.max_session_messages),
            log,
        );

        info!(
            credentials = credentials.kind(),
            snapshot_table = %config.snapshot_table,
            conversation_log = config.conversation_log_enabled,
            "application state initialized"
        );

        Ok(Self::new(config, Arc::new(sheets), Arc::new(store), chat))
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }

    pub fn sheets(&self) -> &dyn SheetsApi {
        self.sheets.as_ref()
    }

    pub fn store(&self) -> &dyn SnapshotStore {
        self.store.as_ref()
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn palette(&self) -> Palette {
        self.config.palette
    }

    pub fn default_sheet_url(&self) -> Option<&str> {
        self.config.default_sheet_url.as_deref()
    }
}
