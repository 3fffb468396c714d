#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sheet_mangler::address::{CellAddress, CellRange};
use sheet_mangler::chat::{
    ChatBackend, ChatMessage, ChatMessageRole, ChatRequest, ChatResponse, ChatService,
    ConversationLog, ConversationStore, InMemoryConversationLog,
};
use sheet_mangler::color::Color;
use sheet_mangler::error::{ManglerError, Result, Upstream};
use sheet_mangler::sheets::model::{
    BatchRequest, CellData, CellFormat, ExtendedValue, GridProperties, SheetProperties,
};
use sheet_mangler::sheets::{GridFields, GridSlice, SheetsApi, SliceCell};
use sheet_mangler::sheets::auth::CredentialsSource;
use sheet_mangler::store::InMemorySnapshotStore;
use sheet_mangler::{AppState, CliArgs, ServerConfig};

pub const SPREADSHEET_ID: &str = "sheet-123";
pub const SHEET_URL: &str = "https://docs.google.com/spreadsheets/d/sheet-123/edit#gid=0";
pub const OTHER_TAB_URL: &str = "https://docs.google.com/spreadsheets/d/sheet-123/edit#gid=99";

/// In-memory spreadsheet with two tabs. Only the first tab ("Model", gid 0)
/// holds cells; formatting batches are recorded and applied to it.
#[derive(Default)]
pub struct FakeSheets {
    cells: Mutex<BTreeMap<(u32, u32), CellData>>,
    batches: Mutex<Vec<Vec<BatchRequest>>>,
    grid_reads: Mutex<Vec<String>>,
    fail_batch: AtomicBool,
}

impl FakeSheets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&self, label: &str, value: ExtendedValue) {
        let address = CellAddress::parse(label).expect("address");
        let mut cells = self.cells.lock();
        let cell = cells
            .entry((address.row_index(), address.column_index()))
            .or_default();
        cell.user_entered_value = Some(value);
    }

    pub fn set_formula(&self, label: &str, formula: &str) {
        self.set_value(
            label,
            ExtendedValue {
                formula_value: Some(formula.into()),
                ..Default::default()
            },
        );
    }

    pub fn set_number(&self, label: &str, number: f64) {
        self.set_value(
            label,
            ExtendedValue {
                number_value: Some(number),
                ..Default::default()
            },
        );
    }

    pub fn set_text(&self, label: &str, text: &str) {
        self.set_value(
            label,
            ExtendedValue {
                string_value: Some(text.into()),
                ..Default::default()
            },
        );
    }

    pub fn set_cell(&self, label: &str, data: CellData) {
        let address = CellAddress::parse(label).expect("address");
        self.cells
            .lock()
            .insert((address.row_index(), address.column_index()), data);
    }

    pub fn set_background(&self, label: &str, color: Color) {
        let address = CellAddress::parse(label).expect("address");
        let mut cells = self.cells.lock();
        let cell = cells
            .entry((address.row_index(), address.column_index()))
            .or_default();
        cell.user_entered_format = Some(CellFormat {
            background_color: Some(color.to_api()),
        });
    }

    pub fn background(&self, label: &str) -> Color {
        let address = CellAddress::parse(label).expect("address");
        let cells = self.cells.lock();
        Color::from_cell(cells.get(&(address.row_index(), address.column_index())))
    }

    pub fn note(&self, label: &str) -> Option<String> {
        let address = CellAddress::parse(label).expect("address");
        self.cells
            .lock()
            .get(&(address.row_index(), address.column_index()))
            .and_then(|c| c.note.clone())
    }

    pub fn batches(&self) -> Vec<Vec<BatchRequest>> {
        self.batches.lock().clone()
    }

    pub fn grid_reads(&self) -> Vec<String> {
        self.grid_reads.lock().clone()
    }

    pub fn fail_next_batches(&self, fail: bool) {
        self.fail_batch.store(fail, Ordering::SeqCst);
    }

    fn tabs() -> Vec<SheetProperties> {
        vec![
            SheetProperties {
                sheet_id: 0,
                title: "Model".into(),
                grid_properties: Some(GridProperties {
                    row_count: Some(10),
                    column_count: Some(5),
                }),
            },
            SheetProperties {
                sheet_id: 99,
                title: "Other".into(),
                grid_properties: Some(GridProperties {
                    row_count: Some(0),
                    column_count: Some(0),
                }),
            },
        ]
    }
}

#[async_trait]
impl SheetsApi for FakeSheets {
    async fn fetch_spreadsheet_metadata(
        &self,
        spreadsheet_id: &str,
    ) -> Result<Vec<SheetProperties>> {
        if spreadsheet_id != SPREADSHEET_ID {
            return Err(ManglerError::transport(
                Upstream::SheetsApi,
                format!("HTTP 404: spreadsheet {spreadsheet_id} not found"),
                false,
            ));
        }
        Ok(Self::tabs())
    }

    async fn fetch_grid_slice(
        &self,
        _spreadsheet_id: &str,
        range: &str,
        _fields: GridFields,
    ) -> Result<GridSlice> {
        self.grid_reads.lock().push(range.to_string());
        let bounds = match range.rsplit_once('!') {
            Some((_, a1)) => Some(CellRange::parse(a1)?),
            None => None,
        };
        let cells = self
            .cells
            .lock()
            .iter()
            .map(|(&(row, col), data)| SliceCell {
                address: CellAddress::from_grid_index(row, col),
                data: data.clone(),
            })
            .filter(|cell| bounds.as_ref().map_or(true, |b| b.contains(&cell.address)))
            .collect();
        Ok(GridSlice { cells })
    }

    async fn apply_batched_formatting(
        &self,
        _spreadsheet_id: &str,
        requests: Vec<BatchRequest>,
    ) -> Result<()> {
        if self.fail_batch.load(Ordering::SeqCst) {
            return Err(ManglerError::transport(
                Upstream::SheetsApi,
                "HTTP 500: backend error",
                true,
            ));
        }
        {
            let mut cells = self.cells.lock();
            for request in &requests {
                let repeat = &request.repeat_cell;
                let range = &repeat.range;
                let writes_note = repeat.fields.contains("note");
                for row in range.start_row_index..range.end_row_index {
                    for col in range.start_column_index..range.end_column_index {
                        let cell = cells.entry((row, col)).or_default();
                        if let Some(format) = &repeat.cell.user_entered_format {
                            cell.user_entered_format = Some(format.clone());
                        }
                        if writes_note {
                            cell.note = repeat.cell.note.clone();
                        }
                    }
                }
            }
        }
        self.batches.lock().push(requests);
        Ok(())
    }
}

/// Replies to every turn with one assistant message `a{n}`.
#[derive(Default)]
pub struct ScriptedChatBackend {
    turns: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedChatBackend {
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(request.clone());
        let n = self.turns.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ChatResponse {
            messages: vec![ChatMessage {
                id: format!("a{n}"),
                role: ChatMessageRole::Assistant,
                content: format!("reply {n}"),
            }],
        })
    }
}

pub fn message(id: &str, role: ChatMessageRole) -> ChatMessage {
    ChatMessage {
        id: id.into(),
        role,
        content: format!("content {id}"),
    }
}

/// A config that passes validation, pointing at `SHEET_URL` by default.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::from_args(CliArgs::default()).expect("default config");
    config.default_sheet_url = Some(SHEET_URL.into());
    config.store_url = Some("https://store.example.test".into());
    config.store_key = Some("service-key".into());
    config.chat_backend_url = Some("http://chat.example.test/api".into());
    config.credentials = Some(CredentialsSource::AccessToken("token".into()));
    config
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub sheets: Arc<FakeSheets>,
    pub store: Arc<InMemorySnapshotStore>,
    pub backend: Arc<ScriptedChatBackend>,
    pub log: Arc<InMemoryConversationLog>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let sheets = Arc::new(FakeSheets::new());
        let store = Arc::new(InMemorySnapshotStore::new());
        let backend = Arc::new(ScriptedChatBackend::new());
        let log = Arc::new(InMemoryConversationLog::new());
        let chat = ChatService::new(
            backend.clone(),
            ConversationStore::new(config.session_capacity, config.max_session_messages),
            Some(log.clone() as Arc<dyn ConversationLog>),
        );
        let state = Arc::new(AppState::new(
            Arc::new(config),
            sheets.clone(),
            store.clone(),
            chat,
        ));
        Self {
            state,
            sheets,
            store,
            backend,
            log,
        }
    }
}
