//! Sheet tools exposed over HTTP.
//!
//! Each tool takes the shared [`AppState`] plus its deserialized params and
//! issues at most one batched formatting call.

pub mod audit;
pub mod paint;
pub mod reset;
pub mod restore;
pub mod snapshot;
pub mod visualize;

use crate::address::CellRange;
use crate::error::{ManglerError, Result};
use crate::logging::sheet_span;
use crate::sheets::model::SheetProperties;
use crate::sheets::{SheetTarget, SheetsApi, resolve_sheet};
use crate::state::AppState;
use indexmap::IndexSet;
use serde::Serialize;
use tracing::{Instrument, debug};

pub use audit::{
    FormulaIssue, FormulaIssuesParams, FormulaIssuesResponse, IssueSeverity, scan_formula_issues,
};
pub use paint::{PaintEntry, PaintResponse, paint_cells};
pub use reset::{ResetParams, ResetResponse, reset_sheet};
pub use restore::{RestoreParams, RestoreResponse, restore_snapshot};
pub use snapshot::{SnapshotParams, SnapshotResponse, snapshot_ranges};
pub use visualize::{VisualizeParams, VisualizeResponse, visualize_formulas};

/// Upper bound on cells a single snapshot, paint or restore may touch.
pub const MAX_CELLS_PER_REQUEST: u64 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    /// Nothing on the sheet qualified; no write was made
    NoCells,
}

/// A sheet URL resolved down to one concrete tab.
#[derive(Debug, Clone)]
pub struct ResolvedSheet {
    pub target: SheetTarget,
    pub properties: SheetProperties,
}

impl ResolvedSheet {
    pub fn spreadsheet_id(&self) -> &str {
        &self.target.spreadsheet_id
    }

    pub fn sheet_id(&self) -> i64 {
        self.properties.sheet_id
    }

    pub fn title(&self) -> &str {
        &self.properties.title
    }
}

pub async fn resolve_target(sheets: &dyn SheetsApi, url: &str) -> Result<ResolvedSheet> {
    let target = SheetTarget::parse(url)?;
    let span = sheet_span(&target.spreadsheet_id, target.gid);
    async move {
        let tabs = sheets
            .fetch_spreadsheet_metadata(&target.spreadsheet_id)
            .await?;
        let properties = resolve_sheet(tabs, target.gid)?;
        debug!(sheet = %properties.title, sheet_id = properties.sheet_id, "resolved sheet");
        Ok(ResolvedSheet { target, properties })
    }
    .instrument(span)
    .await
}

/// The sheet a request targets: its own `url` if given, else the configured default.
pub(crate) fn target_url(state: &AppState, url: Option<String>) -> Result<String> {
    url.map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .or_else(|| state.default_sheet_url().map(str::to_string))
        .ok_or_else(|| {
            ManglerError::invalid_input(
                "sheet URL must be provided in the request or configured as the default",
            )
        })
}

/// Parse normalized references, rejecting the set when it expands past
/// [`MAX_CELLS_PER_REQUEST`].
pub(crate) fn parse_bounded(references: &[String]) -> Result<Vec<CellRange>> {
    let ranges = references
        .iter()
        .map(|r| CellRange::parse(r))
        .collect::<Result<Vec<_>>>()?;
    let total: u64 = ranges.iter().map(CellRange::cell_count).sum();
    if total > MAX_CELLS_PER_REQUEST {
        return Err(ManglerError::invalid_input(format!(
            "request covers {total} cells; at most {MAX_CELLS_PER_REQUEST} are allowed"
        )));
    }
    Ok(ranges)
}

/// Trim and uppercase references, drop blanks and repeats, keep first-seen order.
pub fn normalize_ranges<I, S>(ranges: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = IndexSet::new();
    for range in ranges {
        let normalized = crate::address::normalize_reference(range.as_ref());
        if !normalized.is_empty() {
            seen.insert(normalized);
        }
    }
    seen.into_iter().collect()
}
