//! Formula/literal overlay.
//!
//! Every cell holding a formula or a bare number is recolored with the
//! palette. The previous colors go into a fresh snapshot batch before the
//! overlay is written, so an overlay is always undoable through restore.

use super::{ToolStatus, resolve_target, target_url};
use crate::address::CellAddress;
use crate::color::{Color, Palette};
use crate::error::Result;
use crate::logging::tool_span;
use crate::metrics::METRICS;
use crate::sheets::model::CellData;
use crate::sheets::{GridFields, GridSlice, color_request, quoted_title};
use crate::state::AppState;
use crate::store::{SnapshotRow, random_batch_id};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, error, info};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisualizeParams {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisualizeResponse {
    pub status: ToolStatus,
    pub message: String,
    pub count: usize,
    pub formula_count: usize,
    pub literal_count: usize,
    pub snapshot_batch_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Formula,
    Literal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedCell {
    pub address: CellAddress,
    pub kind: CellKind,
    pub original_color: Color,
}

/// Formula wins over a number; text, booleans and empty cells are skipped.
pub fn classify(cell: &CellData) -> Option<CellKind> {
    if cell.formula().is_some() {
        Some(CellKind::Formula)
    } else if cell.number().is_some() {
        Some(CellKind::Literal)
    } else {
        None
    }
}

pub fn classify_slice(slice: &GridSlice) -> Vec<ClassifiedCell> {
    slice
        .cells
        .iter()
        .filter_map(|cell| {
            classify(&cell.data).map(|kind| ClassifiedCell {
                address: cell.address,
                kind,
                original_color: Color::from_cell(Some(&cell.data)),
            })
        })
        .collect()
}

impl Palette {
    pub fn color_for(&self, kind: CellKind) -> Color {
        match kind {
            CellKind::Formula => self.formula,
            CellKind::Literal => self.literal,
        }
    }
}

pub async fn visualize_formulas(
    state: Arc<AppState>,
    params: VisualizeParams,
) -> Result<VisualizeResponse> {
    async move {
        let url = target_url(&state, params.url)?;
        let sheet = resolve_target(state.sheets(), &url).await?;
        let spreadsheet_id = sheet.spreadsheet_id();
        info!(spreadsheet_id, sheet = sheet.title(), "visualizing formulas");

        let slice = state
            .sheets()
            .fetch_grid_slice(
                spreadsheet_id,
                &quoted_title(sheet.title()),
                GridFields::Classification,
            )
            .await?;
        let targets = classify_slice(&slice);

        if targets.is_empty() {
            return Ok(VisualizeResponse {
                status: ToolStatus::NoCells,
                message: format!(
                    "No formulas or hard-coded numeric values detected on '{}'.",
                    sheet.title()
                ),
                count: 0,
                formula_count: 0,
                literal_count: 0,
                snapshot_batch_id: None,
            });
        }

        let formula_count = targets
            .iter()
            .filter(|t| t.kind == CellKind::Formula)
            .count();
        let literal_count = targets.len() - formula_count;
        info!(
            cells = targets.len(),
            formula_count, literal_count, "classified cells"
        );

        let batch_id = random_batch_id();
        let rows: Vec<SnapshotRow> = targets
            .iter()
            .map(|t| SnapshotRow {
                snapshot_batch_id: batch_id.clone(),
                spreadsheet_id: spreadsheet_id.to_string(),
                gid: sheet.target.gid,
                cell: t.address.label(),
                red: t.original_color.red,
                green: t.original_color.green,
                blue: t.original_color.blue,
                sheet_url: Some(sheet.target.source.clone()),
            })
            .collect();
        state.store().insert_snapshot_rows(&rows).await?;
        METRICS.record_snapshot_rows(rows.len() as u64);
        info!(snapshot_batch_id = %batch_id, rows = rows.len(), "created snapshot");

        let palette = state.palette();
        let requests = targets
            .iter()
            .map(|t| color_request(sheet.sheet_id(), t.address, palette.color_for(t.kind)))
            .collect::<Vec<_>>();
        let request_count = requests.len();
        if let Err(err) = state
            .sheets()
            .apply_batched_formatting(spreadsheet_id, requests)
            .await
        {
            error!(snapshot_batch_id = %batch_id, error = %err, "failed to apply overlay");
            return Err(err);
        }
        METRICS.record_cells_painted("visualize", request_count as u64);
        info!(requests = request_count, "applied overlay");

        Ok(VisualizeResponse {
            status: ToolStatus::Success,
            message: format!(
                "Colored {} cell(s) on '{}' ({} formulas, {} values).",
                targets.len(),
                sheet.title(),
                formula_count,
                literal_count
            ),
            count: targets.len(),
            formula_count,
            literal_count,
            snapshot_batch_id: Some(batch_id),
        })
    }
    .instrument(tool_span("visualize_formulas"))
    .await
}
