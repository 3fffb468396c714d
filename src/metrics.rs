//! Prometheus metrics served on `/metrics`.

use crate::error::ErrorCode;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    /// Route name, e.g. "snapshot" or "chat"
    pub tool: String,
    /// "success" or "error"
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub tool: String,
    /// Stable error code, see [`crate::error::ErrorCode`]
    pub error_type: String,
    /// Coarse grouping of the code, e.g. "client_error"
    pub category: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ToolLabels {
    pub tool: String,
}

pub struct MetricsCollector {
    registry: RwLock<Registry>,

    pub requests_total: Family<RequestLabels, Counter>,
    pub request_duration_seconds: Family<ToolLabels, Histogram>,
    pub active_requests: Family<ToolLabels, Gauge>,
    pub errors_total: Family<ErrorLabels, Counter>,

    /// Snapshot rows written, across snapshot, paint and visualize
    pub snapshot_rows_total: Counter,
    /// Cells whose background a tool rewrote
    pub cells_painted_total: Family<ToolLabels, Counter>,
    pub chat_turns_total: Counter,
    pub chat_sessions_active: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("sheet_mangler");

        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "requests",
            "Requests handled by route and outcome",
            requests_total.clone(),
        );

        // 10ms up to roughly 38s
        let request_duration_seconds =
            Family::<ToolLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.01, 2.5, 10))
            });
        registry.register(
            "request_duration_seconds",
            "Request latency in seconds",
            request_duration_seconds.clone(),
        );

        let active_requests = Family::<ToolLabels, Gauge>::default();
        registry.register(
            "active_requests",
            "Requests currently in flight",
            active_requests.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "errors",
            "Failed requests by route, error code and category",
            errors_total.clone(),
        );

        let snapshot_rows_total = Counter::default();
        registry.register(
            "snapshot_rows",
            "Cell color snapshot rows written",
            snapshot_rows_total.clone(),
        );

        let cells_painted_total = Family::<ToolLabels, Counter>::default();
        registry.register(
            "cells_painted",
            "Cells recolored by tool",
            cells_painted_total.clone(),
        );

        let chat_turns_total = Counter::default();
        registry.register(
            "chat_turns",
            "Chat backend round trips",
            chat_turns_total.clone(),
        );

        let chat_sessions_active = Gauge::default();
        registry.register(
            "chat_sessions_active",
            "Chat sessions held in memory",
            chat_sessions_active.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            requests_total,
            request_duration_seconds,
            active_requests,
            errors_total,
            snapshot_rows_total,
            cells_painted_total,
            chat_turns_total,
            chat_sessions_active,
        }
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry.read())?;
        Ok(buffer)
    }

    pub fn record_request_success(&self, tool: &str, duration: Duration) {
        self.requests_total
            .get_or_create(&RequestLabels {
                tool: tool.to_string(),
                status: "success".to_string(),
            })
            .inc();
        self.observe_duration(tool, duration);
    }

    pub fn record_request_error(
        &self,
        tool: &str,
        duration: Duration,
        error_type: &str,
        category: &str,
    ) {
        self.requests_total
            .get_or_create(&RequestLabels {
                tool: tool.to_string(),
                status: "error".to_string(),
            })
            .inc();
        self.observe_duration(tool, duration);
        self.errors_total
            .get_or_create(&ErrorLabels {
                tool: tool.to_string(),
                error_type: error_type.to_string(),
                category: category.to_string(),
            })
            .inc();
    }

    fn observe_duration(&self, tool: &str, duration: Duration) {
        self.request_duration_seconds
            .get_or_create(&ToolLabels {
                tool: tool.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn record_snapshot_rows(&self, rows: u64) {
        self.snapshot_rows_total.inc_by(rows);
    }

    pub fn record_cells_painted(&self, tool: &str, cells: u64) {
        self.cells_painted_total
            .get_or_create(&ToolLabels {
                tool: tool.to_string(),
            })
            .inc_by(cells);
    }

    pub fn record_chat_turn(&self) {
        self.chat_turns_total.inc();
    }

    pub fn set_active_sessions(&self, sessions: usize) {
        self.chat_sessions_active.set(sessions as i64);
    }

    fn active(&self, tool: &str) -> Gauge {
        self.active_requests
            .get_or_create(&ToolLabels {
                tool: tool.to_string(),
            })
            .clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Times one request against [`METRICS`]. A guard dropped without
/// [`success`](Self::success) or [`error`](Self::error) counts as an
/// "aborted" error, which is what a client disconnect looks like.
pub struct RequestMetrics {
    tool: String,
    start: Instant,
    active: Gauge,
    completed: bool,
}

impl RequestMetrics {
    pub fn new(tool: &str) -> Self {
        let active = METRICS.active(tool);
        active.inc();
        Self {
            tool: tool.to_string(),
            start: Instant::now(),
            active,
            completed: false,
        }
    }

    pub fn success(mut self) {
        METRICS.record_request_success(&self.tool, self.start.elapsed());
        self.finish();
    }

    pub fn error(mut self, code: ErrorCode) {
        METRICS.record_request_error(
            &self.tool,
            self.start.elapsed(),
            &code.to_string(),
            code.category(),
        );
        self.finish();
    }

    fn finish(&mut self) {
        self.completed = true;
        self.active.dec();
    }
}

impl Drop for RequestMetrics {
    fn drop(&mut self) {
        if !self.completed {
            METRICS.record_request_error(&self.tool, self.start.elapsed(), "aborted", "aborted");
            self.active.dec();
        }
    }
}
