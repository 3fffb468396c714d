use super::{ResolvedSheet, ToolStatus, normalize_ranges, parse_bounded, resolve_target};
use crate::address::{CellAddress, union_cells};
use crate::error::{ManglerError, Result};
use crate::logging::tool_span;
use crate::metrics::METRICS;
use crate::sheets::{SheetTarget, color_request, resolve_sheet};
use crate::state::AppState;
use crate::store::SnapshotRow;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, info};

#[derive(Debug, Clone, Deserialize)]
pub struct RestoreParams {
    pub snapshot_batch_id: String,
    /// Narrows the restore to these cells/ranges; cells the batch never
    /// captured are skipped.
    #[serde(default)]
    pub cell_locations: Option<Vec<String>>,
    /// Overrides the sheet recorded in the snapshot rows.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResponse {
    pub status: ToolStatus,
    pub message: String,
    pub count: usize,
    pub snapshot_batch_id: String,
    pub cells: Vec<String>,
}

pub async fn restore_snapshot(
    state: Arc<AppState>,
    params: RestoreParams,
) -> Result<RestoreResponse> {
    async move {
        let batch_id = params.snapshot_batch_id.trim().to_string();
        if batch_id.is_empty() {
            return Err(ManglerError::invalid_input(
                "snapshot_batch_id must be a non-empty string",
            ));
        }

        let filter = match params.cell_locations {
            Some(locations) if !locations.is_empty() => Some(expected_cells(&locations)?),
            _ => None,
        };

        let rows = state
            .store()
            .fetch_snapshot_rows(&batch_id, filter.as_deref())
            .await?;
        if rows.is_empty() {
            return Err(ManglerError::SnapshotNotFound(batch_id));
        }

        let sheet = match params.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => resolve_target(state.sheets(), url).await?,
            None => resolve_origin(&state, &rows).await?,
        };
        info!(
            snapshot_batch_id = %batch_id,
            spreadsheet_id = sheet.spreadsheet_id(),
            sheet = sheet.title(),
            rows = rows.len(),
            "restoring snapshot"
        );

        let mut cells = Vec::with_capacity(rows.len());
        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            let address = CellAddress::parse(&row.cell)?;
            requests.push(color_request(sheet.sheet_id(), address, row.color()));
            cells.push(row.cell.clone());
        }

        state
            .sheets()
            .apply_batched_formatting(sheet.spreadsheet_id(), requests)
            .await?;
        METRICS.record_cells_painted("restore", cells.len() as u64);

        Ok(RestoreResponse {
            status: ToolStatus::Success,
            message: format!(
                "Restored {} cell(s) from snapshot {}.",
                cells.len(),
                batch_id
            ),
            count: cells.len(),
            snapshot_batch_id: batch_id,
            cells,
        })
    }
    .instrument(tool_span("restore"))
    .await
}

/// Expand the advisory cell list into unique labels.
fn expected_cells(locations: &[String]) -> Result<Vec<String>> {
    if let Some(idx) = locations.iter().position(|l| l.trim().is_empty()) {
        return Err(ManglerError::invalid_input(format!(
            "cell_locations entry #{idx} is blank"
        )));
    }
    let ranges = normalize_ranges(locations);
    parse_bounded(&ranges)?;
    Ok(union_cells(&ranges)?
        .into_iter()
        .map(|cell| cell.label())
        .collect())
}

/// The sheet the snapshot was captured from.
async fn resolve_origin(state: &AppState, rows: &[SnapshotRow]) -> Result<ResolvedSheet> {
    let first = &rows[0];
    let target = SheetTarget {
        spreadsheet_id: first.spreadsheet_id.clone(),
        gid: first.gid,
        source: first
            .sheet_url
            .clone()
            .unwrap_or_else(|| first.spreadsheet_id.clone()),
    };
    let tabs = state
        .sheets()
        .fetch_spreadsheet_metadata(&target.spreadsheet_id)
        .await?;
    let properties = resolve_sheet(tabs, target.gid)?;
    Ok(ResolvedSheet { target, properties })
}
