//! Paint-and-annotate: color cells and attach a note to each, after
//! snapshotting everything the request touches under one batch id.

use super::snapshot::snapshot_union;
use super::{ToolStatus, normalize_ranges, parse_bounded, resolve_target, target_url};
use crate::address::{CellRange, normalize_reference};
use crate::color::Color;
use crate::error::{ManglerError, Result};
use crate::logging::tool_span;
use crate::metrics::METRICS;
use crate::sheets::paint_request;
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, info};

#[derive(Debug, Clone, Deserialize)]
pub struct PaintEntry {
    pub cell_location: String,
    #[serde(default)]
    pub message: String,
    pub color: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaintResponse {
    pub status: ToolStatus,
    pub message: String,
    pub count: usize,
    pub snapshot_batch_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct ValidatedEntry {
    reference: String,
    range: CellRange,
    note: String,
    color: Color,
}

/// Normalize every entry and check they share one sheet URL.
/// Returns the entries plus that URL, if any entry carried one.
fn validate_entries(entries: &[PaintEntry]) -> Result<(Vec<ValidatedEntry>, Option<String>)> {
    if entries.is_empty() {
        return Err(ManglerError::invalid_input("no color requests provided"));
    }

    let mut sheet_url: Option<String> = None;
    let mut validated = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.iter().enumerate() {
        let reference = normalize_reference(&entry.cell_location);
        if reference.is_empty() {
            return Err(ManglerError::invalid_input(format!(
                "request #{idx} missing 'cell_location'"
            )));
        }
        if let Some(url) = entry.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            match &sheet_url {
                None => sheet_url = Some(url.to_string()),
                Some(existing) if existing != url => {
                    return Err(ManglerError::invalid_input(
                        "all color requests must target the same 'url'",
                    ));
                }
                Some(_) => {}
            }
        }
        validated.push(ValidatedEntry {
            range: CellRange::parse(&reference)?,
            reference,
            note: entry.message.trim().to_string(),
            color: Color::from_hex(entry.color.trim())?,
        });
    }
    Ok((validated, sheet_url))
}

pub async fn paint_cells(state: Arc<AppState>, entries: Vec<PaintEntry>) -> Result<PaintResponse> {
    async move {
        let (entries, url) = validate_entries(&entries)?;
        let url = target_url(&state, url)?;
        let ranges = normalize_ranges(entries.iter().map(|e| &e.reference));
        parse_bounded(&ranges)?;

        let sheet = resolve_target(state.sheets(), &url).await?;
        info!(
            spreadsheet_id = sheet.spreadsheet_id(),
            sheet = sheet.title(),
            entries = entries.len(),
            "painting cells"
        );

        let snapshot_batch_id =
            snapshot_union(state.sheets(), state.store(), &sheet, &ranges).await?;

        let requests = entries
            .iter()
            .map(|e| paint_request(sheet.sheet_id(), &e.range, e.color, &e.note))
            .collect::<Vec<_>>();
        let cells: u64 = entries.iter().map(|e| e.range.cell_count()).sum();
        state
            .sheets()
            .apply_batched_formatting(sheet.spreadsheet_id(), requests)
            .await?;
        METRICS.record_cells_painted("paint", cells);

        Ok(PaintResponse {
            status: ToolStatus::Success,
            message: format!(
                "Applied {} color request(s) to '{}'.",
                entries.len(),
                sheet.title()
            ),
            count: entries.len(),
            snapshot_batch_id: Some(snapshot_batch_id),
        })
    }
    .instrument(tool_span("paint"))
    .await
}
