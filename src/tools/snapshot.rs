use super::{
    ResolvedSheet, ToolStatus, normalize_ranges, parse_bounded, resolve_target, target_url,
};
use crate::address::CellRange;
use crate::error::{ManglerError, Result};
use crate::logging::tool_span;
use crate::metrics::METRICS;
use crate::sheets::{GridFields, SheetsApi, qualified_range};
use crate::state::AppState;
use crate::store::{SnapshotRow, SnapshotStore, deterministic_batch_id};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, info};

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotParams {
    pub ranges: Vec<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotResponse {
    pub status: ToolStatus,
    pub message: String,
    pub count: usize,
    pub range_snapshot_ids: IndexMap<String, String>,
    pub first_snapshot_batch_id: Option<String>,
}

pub async fn snapshot_ranges(state: Arc<AppState>, params: SnapshotParams) -> Result<SnapshotResponse> {
    async move {
        let url = target_url(&state, params.url)?;
        let ranges = normalize_ranges(&params.ranges);
        if ranges.is_empty() {
            return Err(ManglerError::invalid_input(
                "no valid ranges provided for snapshot",
            ));
        }
        // Reject malformed references before touching the API.
        parse_bounded(&ranges)?;
        let resolved = resolve_target(state.sheets(), &url).await?;
        snapshot_resolved(state.sheets(), state.store(), &resolved, &ranges).await
    }
    .instrument(tool_span("snapshot"))
    .await
}

/// Record the current background of every cell in `ranges` with one
/// deterministic batch id per range, persisted in a single insert.
///
/// `ranges` must already be normalized.
pub(crate) async fn snapshot_resolved(
    sheets: &dyn SheetsApi,
    store: &dyn SnapshotStore,
    sheet: &ResolvedSheet,
    ranges: &[String],
) -> Result<SnapshotResponse> {
    let spreadsheet_id = sheet.spreadsheet_id();
    let gid = sheet.target.gid;

    let parsed = parse_bounded(ranges)?;
    let mut rows = Vec::new();
    let mut range_snapshot_ids = IndexMap::new();
    for (reference, range) in ranges.iter().zip(parsed) {
        let batch_id = deterministic_batch_id(spreadsheet_id, gid, reference);
        rows.extend(read_range_rows(sheets, sheet, &range, &batch_id).await?);
        range_snapshot_ids.insert(reference.clone(), batch_id);
    }

    store.insert_snapshot_rows(&rows).await?;
    METRICS.record_snapshot_rows(rows.len() as u64);

    let first_snapshot_batch_id = ranges
        .first()
        .and_then(|r| range_snapshot_ids.get(r))
        .cloned();
    info!(
        spreadsheet_id,
        sheet = sheet.title(),
        rows = rows.len(),
        batches = range_snapshot_ids.len(),
        first_batch = first_snapshot_batch_id.as_deref().unwrap_or_default(),
        "stored cell color snapshot"
    );

    Ok(SnapshotResponse {
        status: ToolStatus::Success,
        message: format!(
            "Stored {} cell color snapshot(s) across {} batch id(s).",
            rows.len(),
            range_snapshot_ids.len()
        ),
        count: rows.len(),
        range_snapshot_ids,
        first_snapshot_batch_id,
    })
}

/// Record every cell of every range under a single batch id derived from the
/// joined range list, so restoring that one id undoes the whole request.
/// Cells covered by more than one range are stored once.
///
/// `ranges` must already be normalized. Returns the batch id.
pub(crate) async fn snapshot_union(
    sheets: &dyn SheetsApi,
    store: &dyn SnapshotStore,
    sheet: &ResolvedSheet,
    ranges: &[String],
) -> Result<String> {
    let spreadsheet_id = sheet.spreadsheet_id();
    let batch_id = deterministic_batch_id(spreadsheet_id, sheet.target.gid, &ranges.join(","));

    let mut by_cell = IndexMap::new();
    for range in parse_bounded(ranges)? {
        for row in read_range_rows(sheets, sheet, &range, &batch_id).await? {
            by_cell.entry(row.cell.clone()).or_insert(row);
        }
    }
    let rows: Vec<SnapshotRow> = by_cell.into_values().collect();

    store.insert_snapshot_rows(&rows).await?;
    METRICS.record_snapshot_rows(rows.len() as u64);
    info!(
        spreadsheet_id,
        sheet = sheet.title(),
        rows = rows.len(),
        ranges = ranges.len(),
        batch = batch_id.as_str(),
        "stored union color snapshot"
    );
    Ok(batch_id)
}

/// One color read for `range`, as rows tagged with `batch_id`.
async fn read_range_rows(
    sheets: &dyn SheetsApi,
    sheet: &ResolvedSheet,
    range: &CellRange,
    batch_id: &str,
) -> Result<Vec<SnapshotRow>> {
    let spreadsheet_id = sheet.spreadsheet_id();
    let slice = sheets
        .fetch_grid_slice(
            spreadsheet_id,
            &qualified_range(sheet.title(), range),
            GridFields::Colors,
        )
        .await?;

    Ok(range
        .cells()
        .map(|cell| {
            let color = slice.color_at(&cell);
            SnapshotRow {
                snapshot_batch_id: batch_id.to_string(),
                spreadsheet_id: spreadsheet_id.to_string(),
                gid: sheet.target.gid,
                cell: cell.label(),
                red: color.red,
                green: color.green,
                blue: color.blue,
                sheet_url: Some(sheet.target.source.clone()),
            }
        })
        .collect())
}
