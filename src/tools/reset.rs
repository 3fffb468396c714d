use super::{ToolStatus, resolve_target, target_url};
use crate::error::{ManglerError, Result};
use crate::logging::tool_span;
use crate::metrics::METRICS;
use crate::sheets::reset_request;
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, info};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetParams {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetResponse {
    pub status: ToolStatus,
    pub message: String,
    pub rows: u32,
    pub columns: u32,
}

/// Paint the whole tab white and clear every note. No snapshot is taken.
pub async fn reset_sheet(state: Arc<AppState>, params: ResetParams) -> Result<ResetResponse> {
    async move {
        let url = target_url(&state, params.url)?;
        let sheet = resolve_target(state.sheets(), &url).await?;

        let grid = sheet.properties.grid_properties.as_ref();
        let (Some(rows), Some(columns)) = (
            grid.and_then(|g| g.row_count),
            grid.and_then(|g| g.column_count),
        ) else {
            return Err(ManglerError::invalid_input(format!(
                "unable to determine grid size for '{}'",
                sheet.title()
            )));
        };

        if rows == 0 || columns == 0 {
            return Ok(ResetResponse {
                status: ToolStatus::NoCells,
                message: format!("Sheet '{}' has no cells to reset.", sheet.title()),
                rows,
                columns,
            });
        }

        state
            .sheets()
            .apply_batched_formatting(
                sheet.spreadsheet_id(),
                vec![reset_request(sheet.sheet_id(), rows, columns)],
            )
            .await?;
        METRICS.record_cells_painted("reset", rows as u64 * columns as u64);
        info!(
            spreadsheet_id = sheet.spreadsheet_id(),
            sheet = sheet.title(),
            rows,
            columns,
            "reset sheet colors and notes"
        );

        Ok(ResetResponse {
            status: ToolStatus::Success,
            message: format!(
                "Reset colors and notes on '{}' ({rows} rows x {columns} columns).",
                sheet.title()
            ),
            rows,
            columns,
        })
    }
    .instrument(tool_span("reset"))
    .await
}
