//! Tracing subscriber for the service.
//!
//! One formatting layer (JSON or pretty) writes through a non-blocking
//! writer to stdout, stderr or a log directory. When an OTLP collector is
//! configured, spans are also exported over gRPC.

use anyhow::{Context, Result};
use opentelemetry::{
    KeyValue,
    trace::{TraceError, TracerProvider as _},
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const SERVICE_NAME: &str = "sheet-mangler";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, with the current span attached
    Json,
    /// Multi-line, colored output for a terminal
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    /// Default, so stdout stays free for piping
    Stderr,
    /// Files under [`LoggingConfig::log_dir`]
    File,
}

impl LogOutput {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdout" => Some(Self::Stdout),
            "stderr" => Some(Self::Stderr),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Rendering of each event
    pub format: LogFormat,
    /// Destination of the rendered events
    pub output: LogOutput,
    /// Directory for log files, read only with [`LogOutput::File`]
    pub log_dir: PathBuf,
    /// File name stem; rotated files get a date suffix
    pub log_file_prefix: String,
    /// `service.name` on exported spans
    pub service_name: String,
    /// `service.version` on exported spans
    pub service_version: String,
    /// Deployment name. "production" and "prod" select JSON output, an
    /// info-level default filter and 10% trace sampling.
    pub environment: String,
    /// Export spans over OTLP; needs `otlp_endpoint` as well
    pub enable_otel: bool,
    /// gRPC endpoint of the collector, e.g. `http://localhost:4317`
    pub otlp_endpoint: Option<String>,
    /// Start a new file each day instead of appending to one file
    pub enable_rotation: bool,
    /// Fraction of root traces exported, in `[0, 1]`
    pub otel_sampling_rate: f64,
    /// Export timeout per batch, in seconds
    pub otlp_timeout_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::for_environment("development")
    }
}

impl LoggingConfig {
    /// Defaults suited to the named deployment.
    pub fn for_environment(environment: &str) -> Self {
        let production = is_production(environment);
        Self {
            format: if production {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            output: LogOutput::Stderr,
            log_dir: PathBuf::from("logs"),
            log_file_prefix: SERVICE_NAME.to_string(),
            service_name: SERVICE_NAME.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: environment.to_string(),
            enable_otel: false,
            otlp_endpoint: None,
            enable_rotation: true,
            otel_sampling_rate: if production { 0.1 } else { 1.0 },
            otlp_timeout_secs: 10,
        }
    }

    /// Read `ENVIRONMENT`/`ENV`, `LOG_FORMAT`, `LOG_OUTPUT`, `LOG_DIR` and
    /// the OTLP variables. Unparseable values keep the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("ENV"))
            .unwrap_or_else(|| "development".to_string());
        let mut config = Self::for_environment(&environment);

        if let Some(format) = lookup("LOG_FORMAT").as_deref().and_then(LogFormat::parse) {
            config.format = format;
        }
        if let Some(output) = lookup("LOG_OUTPUT").as_deref().and_then(LogOutput::parse) {
            config.output = output;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        config.otlp_endpoint =
            lookup("OTEL_EXPORTER_OTLP_ENDPOINT").or_else(|| lookup("OTLP_ENDPOINT"));
        config.enable_otel = config.otlp_endpoint.is_some() || lookup("ENABLE_OTEL").is_some();

        if let Some(rate) = lookup("OTEL_SAMPLING_RATE").and_then(|v| v.parse::<f64>().ok()) {
            config.otel_sampling_rate = rate.clamp(0.0, 1.0);
        }
        if let Some(secs) = lookup("OTEL_EXPORTER_OTLP_TIMEOUT").and_then(|v| v.parse().ok()) {
            config.otlp_timeout_secs = secs;
        }
        config
    }

    /// Filter used when `RUST_LOG` is unset. HTTP plumbing stays at info.
    fn default_filter(&self) -> String {
        let level = if is_production(&self.environment) {
            "info"
        } else {
            "debug"
        };
        format!("{level},hyper=info,tower=info,reqwest=info")
    }

    fn sampler(&self) -> Sampler {
        match self.otel_sampling_rate {
            rate if rate >= 1.0 => Sampler::AlwaysOn,
            rate if rate <= 0.0 => Sampler::AlwaysOff,
            rate => Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(rate))),
        }
    }

    fn resource(&self) -> Resource {
        use opentelemetry_semantic_conventions::resource as semconv;
        Resource::new(vec![
            KeyValue::new(semconv::SERVICE_NAME, self.service_name.clone()),
            KeyValue::new(semconv::SERVICE_VERSION, self.service_version.clone()),
            KeyValue::new("deployment.environment", self.environment.clone()),
            KeyValue::new("service.namespace", "sheets"),
        ])
    }

    fn writer(&self) -> Result<(NonBlocking, WorkerGuard)> {
        Ok(match self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
            LogOutput::File => {
                std::fs::create_dir_all(&self.log_dir).with_context(|| {
                    format!("creating log directory {}", self.log_dir.display())
                })?;
                let appender = if self.enable_rotation {
                    tracing_appender::rolling::daily(&self.log_dir, &self.log_file_prefix)
                } else {
                    tracing_appender::rolling::never(&self.log_dir, &self.log_file_prefix)
                };
                tracing_appender::non_blocking(appender)
            }
        })
    }
}

fn is_production(environment: &str) -> bool {
    matches!(environment, "production" | "prod")
}

/// Install the global subscriber. Buffered lines are flushed when the
/// returned guard drops, so hold it until exit.
pub fn init_logging(config: LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter()));
    let (writer, guard) = config.writer()?;

    let events: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(filter)
            .boxed(),
    };

    let exporter = match (&config.otlp_endpoint, config.enable_otel) {
        (Some(endpoint), true) => match tracer_provider(&config, endpoint) {
            Ok(provider) => Some(
                tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)),
            ),
            Err(e) => {
                eprintln!("warning: OTLP exporter unavailable ({e}); spans stay local");
                None
            }
        },
        (None, true) => {
            eprintln!("warning: ENABLE_OTEL set without OTEL_EXPORTER_OTLP_ENDPOINT");
            None
        }
        _ => None,
    };
    let exporting = exporter.is_some();

    tracing_subscriber::registry()
        .with(events)
        .with(exporter)
        .try_init()
        .context("installing the global tracing subscriber")?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = %config.environment,
        format = ?config.format,
        output = ?config.output,
        otlp = exporting,
        sampling_rate = config.otel_sampling_rate,
        "logging initialized"
    );
    Ok(Some(guard))
}

fn tracer_provider(config: &LoggingConfig, endpoint: &str) -> Result<TracerProvider, TraceError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(config.otlp_timeout_secs));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(config.sampler())
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(config.resource()),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .and_then(|tracer| {
            tracer
                .provider()
                .ok_or_else(|| TraceError::from("tracer provider was dropped"))
        })
}

/// Flush and stop the OTLP exporter, if one was installed.
pub fn shutdown_telemetry() {
    tracing::info!("flushing telemetry");
    opentelemetry::global::shutdown_tracer_provider();
}

/// Span for one tool invocation.
pub fn tool_span(tool: &str) -> tracing::Span {
    tracing::info_span!("tool", tool, service = SERVICE_NAME)
}

/// Span for work against one resolved sheet.
pub fn sheet_span(spreadsheet_id: &str, gid: Option<i64>) -> tracing::Span {
    tracing::info_span!("sheet", sheet.spreadsheet_id = spreadsheet_id, sheet.gid = ?gid)
}

pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("chat_session", chat.session_id = session_id)
}
