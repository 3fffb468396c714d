use crate::color::{Color, Palette};
use crate::error::{ManglerError, Result as ManglerResult};
use crate::recovery::RetryConfig;
use crate::sheets::auth::CredentialsSource;
use crate::sheets::client::DEFAULT_SHEETS_BASE_URL;
use crate::store::SNAPSHOT_TABLE;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8000";
const DEFAULT_SESSION_CAPACITY: usize = 256;
const DEFAULT_MAX_SESSION_MESSAGES: usize = 500;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FORMULA_COLOR: &str = "#BFEBBF";
const DEFAULT_LITERAL_COLOR: &str = "#FACC80";
const DEFAULT_CONVERSATION_TABLE: &str = "conversation_messages";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_bind_address: SocketAddr,
    /// Sheet targeted by tools whose request names none
    pub default_sheet_url: Option<String>,
    pub sheets_api_url: String,
    pub credentials: Option<CredentialsSource>,
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub snapshot_table: String,
    pub conversation_log_enabled: bool,
    pub conversation_table: String,
    pub chat_backend_url: Option<String>,
    pub chat_api_key: Option<String>,
    pub session_capacity: usize,
    pub max_session_messages: usize,
    pub request_timeout: Duration,
    pub retry_attempts: u32,
    pub palette: Palette,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            http_bind: cli_http_bind,
            spreadsheet_url: cli_spreadsheet_url,
            sheets_api_url: cli_sheets_api_url,
            access_token: cli_access_token,
            credentials_file: cli_credentials_file,
            metadata_credentials: cli_metadata_credentials,
            store_url: cli_store_url,
            store_key: cli_store_key,
            snapshot_table: cli_snapshot_table,
            conversation_log: cli_conversation_log,
            conversation_table: cli_conversation_table,
            chat_backend_url: cli_chat_backend_url,
            chat_api_key: cli_chat_api_key,
            session_capacity: cli_session_capacity,
            max_session_messages: cli_max_session_messages,
            request_timeout_secs: cli_request_timeout_secs,
            retry_attempts: cli_retry_attempts,
            formula_color: cli_formula_color,
            literal_color: cli_literal_color,
            shutdown_timeout_secs: cli_shutdown_timeout_secs,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            http_bind: file_http_bind,
            spreadsheet_url: file_spreadsheet_url,
            sheets_api_url: file_sheets_api_url,
            access_token: file_access_token,
            credentials_file: file_credentials_file,
            metadata_credentials: file_metadata_credentials,
            store_url: file_store_url,
            store_key: file_store_key,
            snapshot_table: file_snapshot_table,
            conversation_log: file_conversation_log,
            conversation_table: file_conversation_table,
            chat_backend_url: file_chat_backend_url,
            chat_api_key: file_chat_api_key,
            session_capacity: file_session_capacity,
            max_session_messages: file_max_session_messages,
            request_timeout_secs: file_request_timeout_secs,
            retry_attempts: file_retry_attempts,
            formula_color: file_formula_color,
            literal_color: file_literal_color,
            shutdown_timeout_secs: file_shutdown_timeout_secs,
        } = file_config;

        let http_bind_address = cli_http_bind.or(file_http_bind).unwrap_or_else(|| {
            DEFAULT_HTTP_BIND
                .parse()
                .expect("default bind address valid")
        });

        let credentials = if let Some(token) = non_blank(cli_access_token.or(file_access_token)) {
            Some(CredentialsSource::AccessToken(token))
        } else if let Some(path) = cli_credentials_file.or(file_credentials_file) {
            Some(CredentialsSource::AuthorizedUser(path))
        } else if cli_metadata_credentials
            .or(file_metadata_credentials)
            .unwrap_or(false)
        {
            Some(CredentialsSource::MetadataServer)
        } else {
            None
        };

        let formula_color = parse_color(
            "formula color",
            cli_formula_color.or(file_formula_color),
            DEFAULT_FORMULA_COLOR,
        )?;
        let literal_color = parse_color(
            "literal color",
            cli_literal_color.or(file_literal_color),
            DEFAULT_LITERAL_COLOR,
        )?;

        let request_timeout_secs = cli_request_timeout_secs
            .or(file_request_timeout_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        anyhow::ensure!(
            request_timeout_secs > 0,
            "request timeout must be at least one second"
        );

        Ok(Self {
            http_bind_address,
            default_sheet_url: non_blank(cli_spreadsheet_url.or(file_spreadsheet_url)),
            sheets_api_url: non_blank(cli_sheets_api_url.or(file_sheets_api_url))
                .unwrap_or_else(|| DEFAULT_SHEETS_BASE_URL.to_string()),
            credentials,
            store_url: non_blank(cli_store_url.or(file_store_url)),
            store_key: non_blank(cli_store_key.or(file_store_key)),
            snapshot_table: non_blank(cli_snapshot_table.or(file_snapshot_table))
                .unwrap_or_else(|| SNAPSHOT_TABLE.to_string()),
            conversation_log_enabled: cli_conversation_log
                .or(file_conversation_log)
                .unwrap_or(false),
            conversation_table: non_blank(cli_conversation_table.or(file_conversation_table))
                .unwrap_or_else(|| DEFAULT_CONVERSATION_TABLE.to_string()),
            chat_backend_url: non_blank(cli_chat_backend_url.or(file_chat_backend_url)),
            chat_api_key: non_blank(cli_chat_api_key.or(file_chat_api_key)),
            session_capacity: cli_session_capacity
                .or(file_session_capacity)
                .unwrap_or(DEFAULT_SESSION_CAPACITY)
                .max(1),
            max_session_messages: cli_max_session_messages
                .or(file_max_session_messages)
                .unwrap_or(DEFAULT_MAX_SESSION_MESSAGES)
                .max(1),
            request_timeout: Duration::from_secs(request_timeout_secs),
            retry_attempts: cli_retry_attempts
                .or(file_retry_attempts)
                .unwrap_or(DEFAULT_RETRY_ATTEMPTS)
                .max(1),
            palette: Palette {
                formula: formula_color,
                literal: literal_color,
            },
            shutdown_timeout: Duration::from_secs(
                cli_shutdown_timeout_secs
                    .or(file_shutdown_timeout_secs)
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            ),
        })
    }

    /// Check every external collaborator the service needs is configured.
    pub fn validate(&self) -> ManglerResult<()> {
        let store_url = self.store_url.as_deref().ok_or_else(|| {
            ManglerError::Configuration("SUPABASE_URL must be set for the snapshot store".into())
        })?;
        ensure_http_url("snapshot store URL", store_url)?;
        if self.store_key.is_none() {
            return Err(ManglerError::Configuration(
                "SUPABASE_SERVICE_KEY must be set for the snapshot store".into(),
            ));
        }

        let chat_url = self.chat_backend_url.as_deref().ok_or_else(|| {
            ManglerError::Configuration("CHAT_BACKEND_URL must be set".into())
        })?;
        ensure_http_url("chat backend URL", chat_url)?;
        ensure_http_url("Sheets API URL", &self.sheets_api_url)?;

        match &self.credentials {
            None => Err(ManglerError::Configuration(
                "no Sheets credentials configured: set an access token, a credentials file or enable metadata credentials".into(),
            )),
            Some(CredentialsSource::AuthorizedUser(path)) if !path.is_file() => {
                Err(ManglerError::Configuration(format!(
                    "credentials file {} does not exist",
                    path.display()
                )))
            }
            Some(_) => Ok(()),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::network(self.retry_attempts)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_color(label: &str, value: Option<String>, default: &str) -> Result<Color> {
    let raw = non_blank(value).unwrap_or_else(|| default.to_string());
    Color::from_hex(&raw).with_context(|| format!("invalid {label} '{raw}'"))
}

fn ensure_http_url(label: &str, url: &str) -> ManglerResult<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ManglerError::Configuration(format!(
            "{label} '{url}' must start with http:// or https://"
        )))
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "sheet-mangler",
    about = "Snapshot, paint, visualize and restore Google Sheets cell colors",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML, JSON or TOML)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "SHEET_MANGLER_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "SPREADSHEET_URL",
        value_name = "URL",
        help = "Sheet used when a tool request does not name one"
    )]
    pub spreadsheet_url: Option<String>,

    #[arg(
        long,
        env = "SHEET_MANGLER_SHEETS_API_URL",
        value_name = "URL",
        help = "Sheets v4 spreadsheets endpoint"
    )]
    pub sheets_api_url: Option<String>,

    #[arg(
        long,
        env = "SHEET_MANGLER_ACCESS_TOKEN",
        value_name = "TOKEN",
        hide_env_values = true,
        help = "Pre-issued OAuth bearer token for the Sheets API"
    )]
    pub access_token: Option<String>,

    #[arg(
        long,
        env = "SHEET_MANGLER_CREDENTIALS_FILE",
        value_name = "FILE",
        help = "Authorized-user token file with a refresh token"
    )]
    pub credentials_file: Option<PathBuf>,

    #[arg(
        long,
        env = "SHEET_MANGLER_METADATA_CREDENTIALS",
        value_name = "BOOL",
        help = "Fetch Sheets tokens from the compute metadata server"
    )]
    pub metadata_credentials: Option<bool>,

    #[arg(
        long,
        env = "SUPABASE_URL",
        value_name = "URL",
        help = "PostgREST base URL of the snapshot store"
    )]
    pub store_url: Option<String>,

    #[arg(
        long,
        env = "SUPABASE_SERVICE_KEY",
        value_name = "KEY",
        hide_env_values = true,
        help = "Service key for the snapshot store"
    )]
    pub store_key: Option<String>,

    #[arg(
        long,
        env = "SHEET_MANGLER_SNAPSHOT_TABLE",
        value_name = "TABLE",
        help = "Table holding cell color snapshots"
    )]
    pub snapshot_table: Option<String>,

    #[arg(
        long,
        env = "SHEET_MANGLER_CONVERSATION_LOG",
        value_name = "BOOL",
        help = "Persist chat messages to the conversation table"
    )]
    pub conversation_log: Option<bool>,

    #[arg(
        long,
        env = "SHEET_MANGLER_CONVERSATION_TABLE",
        value_name = "TABLE",
        help = "Table receiving logged chat messages"
    )]
    pub conversation_table: Option<String>,

    #[arg(
        long,
        env = "CHAT_BACKEND_URL",
        value_name = "URL",
        help = "Endpoint of the LLM chat backend"
    )]
    pub chat_backend_url: Option<String>,

    #[arg(
        long,
        env = "SHEET_MANGLER_CHAT_API_KEY",
        value_name = "KEY",
        hide_env_values = true,
        help = "Bearer key sent to the chat backend"
    )]
    pub chat_api_key: Option<String>,

    #[arg(
        long,
        env = "SHEET_MANGLER_SESSION_CAPACITY",
        value_name = "N",
        help = "Maximum chat sessions kept in memory",
        value_parser = clap::value_parser!(usize)
    )]
    pub session_capacity: Option<usize>,

    #[arg(
        long,
        env = "SHEET_MANGLER_MAX_SESSION_MESSAGES",
        value_name = "N",
        help = "Messages kept per chat session",
        value_parser = clap::value_parser!(usize)
    )]
    pub max_session_messages: Option<usize>,

    #[arg(
        long,
        env = "SHEET_MANGLER_REQUEST_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Timeout for each external call"
    )]
    pub request_timeout_secs: Option<u64>,

    #[arg(
        long,
        env = "SHEET_MANGLER_RETRY_ATTEMPTS",
        value_name = "N",
        help = "Attempts per external call for transient failures"
    )]
    pub retry_attempts: Option<u32>,

    #[arg(
        long,
        env = "SHEET_MANGLER_FORMULA_COLOR",
        value_name = "HEX",
        help = "Overlay color for formula cells"
    )]
    pub formula_color: Option<String>,

    #[arg(
        long,
        env = "SHEET_MANGLER_LITERAL_COLOR",
        value_name = "HEX",
        help = "Overlay color for numeric literal cells"
    )]
    pub literal_color: Option<String>,

    #[arg(
        long,
        env = "SHEET_MANGLER_SHUTDOWN_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Grace period for in-flight requests on shutdown"
    )]
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    http_bind: Option<SocketAddr>,
    spreadsheet_url: Option<String>,
    sheets_api_url: Option<String>,
    access_token: Option<String>,
    credentials_file: Option<PathBuf>,
    metadata_credentials: Option<bool>,
    store_url: Option<String>,
    store_key: Option<String>,
    snapshot_table: Option<String>,
    conversation_log: Option<bool>,
    conversation_table: Option<String>,
    chat_backend_url: Option<String>,
    chat_api_key: Option<String>,
    session_capacity: Option<usize>,
    max_session_messages: Option<usize>,
    request_timeout_secs: Option<u64>,
    retry_attempts: Option<u32>,
    formula_color: Option<String>,
    literal_color: Option<String>,
    shutdown_timeout_secs: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        "toml" => toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
