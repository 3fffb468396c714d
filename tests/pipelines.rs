mod support;

use assert_matches::assert_matches;
use sheet_mangler::color::{Color, WHITE};
use sheet_mangler::error::{ErrorCode, ManglerError};
use sheet_mangler::sheets::model::{CellData, ErrorValue, ExtendedValue};
use sheet_mangler::store::deterministic_batch_id;
use sheet_mangler::tools::{
    self, FormulaIssuesParams, IssueSeverity, PaintEntry, ResetParams, RestoreParams,
    SnapshotParams, ToolStatus, VisualizeParams,
};
use support::{Harness, OTHER_TAB_URL, SPREADSHEET_ID, test_config};

const RED: Color = Color {
    red: 1.0,
    green: 0.0,
    blue: 0.0,
};
const BLUE: Color = Color {
    red: 0.0,
    green: 0.0,
    blue: 1.0,
};

fn restore_params(batch_id: &str, cells: Option<&[&str]>) -> RestoreParams {
    RestoreParams {
        snapshot_batch_id: batch_id.to_string(),
        cell_locations: cells.map(|c| c.iter().map(|s| s.to_string()).collect()),
        url: None,
    }
}

fn paint(cell: &str, message: &str, color: &str) -> PaintEntry {
    PaintEntry {
        cell_location: cell.into(),
        message: message.into(),
        color: color.into(),
        url: None,
    }
}

#[tokio::test]
async fn overlay_then_restore_brings_back_original_colors() {
    let h = Harness::new();
    h.sheets.set_formula("A1", "=B1*2");
    h.sheets.set_number("B1", 3.0);
    h.sheets.set_text("C1", "label");
    h.sheets.set_background("B1", RED);

    let overlay = tools::visualize_formulas(h.state.clone(), VisualizeParams::default())
        .await
        .unwrap();
    assert_eq!(overlay.status, ToolStatus::Success);
    assert_eq!(overlay.count, 2);
    assert_eq!(overlay.formula_count, 1);
    assert_eq!(overlay.literal_count, 1);
    let batch_id = overlay.snapshot_batch_id.expect("batch id");
    assert_eq!(h.store.batch_len(&batch_id), 2);

    let palette = h.state.palette();
    assert_eq!(h.sheets.background("A1"), palette.formula);
    assert_eq!(h.sheets.background("B1"), palette.literal);
    assert_eq!(h.sheets.background("C1"), WHITE);
    assert_eq!(h.sheets.batches().len(), 1);

    let restored = tools::restore_snapshot(h.state.clone(), restore_params(&batch_id, None))
        .await
        .unwrap();
    assert_eq!(restored.count, 2);
    assert_eq!(restored.snapshot_batch_id, batch_id);
    assert_eq!(h.sheets.background("A1"), WHITE);
    assert_eq!(h.sheets.background("B1"), RED);
}

#[tokio::test]
async fn overlay_without_candidates_writes_nothing() {
    let h = Harness::new();
    h.sheets.set_text("A1", "only text");

    let overlay = tools::visualize_formulas(h.state.clone(), VisualizeParams::default())
        .await
        .unwrap();
    assert_eq!(overlay.status, ToolStatus::NoCells);
    assert_eq!(overlay.count, 0);
    assert!(overlay.snapshot_batch_id.is_none());
    assert!(h.store.is_empty());
    assert!(h.sheets.batches().is_empty());
}

#[tokio::test]
async fn overlay_needs_a_sheet_url() {
    let mut config = test_config();
    config.default_sheet_url = None;
    let h = Harness::with_config(config);

    let err = tools::visualize_formulas(h.state.clone(), VisualizeParams::default())
        .await
        .unwrap_err();
    assert_matches!(err, ManglerError::InvalidInput(_));
}

#[tokio::test]
async fn snapshot_is_idempotent_per_range() {
    let h = Harness::new();
    h.sheets.set_background("A1", RED);

    let params = SnapshotParams {
        ranges: vec![" a1:b2 ".into(), "A1:B2".into(), "".into()],
        url: None,
    };
    let first = tools::snapshot_ranges(h.state.clone(), params.clone())
        .await
        .unwrap();
    let second = tools::snapshot_ranges(h.state.clone(), params).await.unwrap();

    assert_eq!(first.count, 4);
    assert_eq!(first.range_snapshot_ids.len(), 1);
    let expected = deterministic_batch_id(SPREADSHEET_ID, Some(0), "A1:B2");
    assert_eq!(first.range_snapshot_ids["A1:B2"], expected);
    assert_eq!(first.first_snapshot_batch_id.as_deref(), Some(expected.as_str()));
    assert_eq!(second.first_snapshot_batch_id, first.first_snapshot_batch_id);
    assert_eq!(h.store.len(), 4);
    assert!(h.sheets.grid_reads().iter().all(|r| r == "'Model'!A1:B2"));
}

#[tokio::test]
async fn snapshot_assigns_one_batch_per_range() {
    let h = Harness::new();
    let response = tools::snapshot_ranges(
        h.state.clone(),
        SnapshotParams {
            ranges: vec!["c3".into(), "A1:A2".into()],
            url: None,
        },
    )
    .await
    .unwrap();

    let ids: Vec<&str> = response.range_snapshot_ids.keys().map(String::as_str).collect();
    assert_eq!(ids, ["C3", "A1:A2"]);
    assert_eq!(
        response.first_snapshot_batch_id.as_deref(),
        Some(deterministic_batch_id(SPREADSHEET_ID, Some(0), "C3").as_str())
    );
    assert_eq!(response.count, 3);
}

#[tokio::test]
async fn snapshot_rejects_blank_and_malformed_ranges() {
    let h = Harness::new();
    let blank = tools::snapshot_ranges(
        h.state.clone(),
        SnapshotParams {
            ranges: vec!["  ".into(), String::new()],
            url: None,
        },
    )
    .await
    .unwrap_err();
    assert_matches!(blank, ManglerError::InvalidInput(_));

    let malformed = tools::snapshot_ranges(
        h.state.clone(),
        SnapshotParams {
            ranges: vec!["A0".into()],
            url: None,
        },
    )
    .await
    .unwrap_err();
    assert_eq!(malformed.code(), ErrorCode::InvalidInput);
    assert!(h.sheets.grid_reads().is_empty());
}

#[tokio::test]
async fn restore_filter_skips_cells_outside_the_batch() {
    let h = Harness::new();
    h.sheets.set_background("A1", RED);
    let snapshot = tools::snapshot_ranges(
        h.state.clone(),
        SnapshotParams {
            ranges: vec!["A1:A2".into()],
            url: None,
        },
    )
    .await
    .unwrap();
    let batch_id = snapshot.first_snapshot_batch_id.unwrap();
    h.sheets.set_background("A1", BLUE);

    let restored =
        tools::restore_snapshot(h.state.clone(), restore_params(&batch_id, Some(&["a1", "C9"])))
            .await
            .unwrap();
    assert_eq!(restored.count, 1);
    assert_eq!(restored.cells, ["A1"]);
    assert_eq!(h.sheets.background("A1"), RED);
}

#[tokio::test]
async fn restore_of_unknown_batch_is_not_found() {
    let h = Harness::new();
    let err = tools::restore_snapshot(h.state.clone(), restore_params("missing", None))
        .await
        .unwrap_err();
    assert_matches!(err, ManglerError::SnapshotNotFound(ref id) if id == "missing");
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert!(h.sheets.batches().is_empty());

    let blank = tools::restore_snapshot(h.state.clone(), restore_params("  ", None))
        .await
        .unwrap_err();
    assert_matches!(blank, ManglerError::InvalidInput(_));
}

#[tokio::test]
async fn paint_snapshots_then_restore_undoes_colors() {
    let h = Harness::new();
    h.sheets.set_background("B2", BLUE);
    h.sheets.set_background("D4", BLUE);

    let painted = tools::paint_cells(
        h.state.clone(),
        vec![
            paint(" b2 ", " check this ", "#FF0000"),
            paint("C3:D4", "", "00FF00"),
        ],
    )
    .await
    .unwrap();
    assert_eq!(painted.status, ToolStatus::Success);
    assert_eq!(painted.count, 2);
    let batch_id = painted.snapshot_batch_id.expect("batch id");
    assert_eq!(
        batch_id,
        deterministic_batch_id(SPREADSHEET_ID, Some(0), "B2,C3:D4")
    );

    assert_eq!(h.sheets.background("B2"), RED);
    assert_eq!(h.sheets.note("B2").as_deref(), Some("check this"));
    assert_eq!(h.sheets.background("D4"), Color::new(0.0, 1.0, 0.0));
    assert_eq!(h.store.len(), 5);
    assert_eq!(h.store.batch_len(&batch_id), 5);

    let restored = tools::restore_snapshot(h.state.clone(), restore_params(&batch_id, None))
        .await
        .unwrap();
    assert_eq!(restored.count, 5);
    assert_eq!(h.sheets.background("B2"), BLUE);
    assert_eq!(h.sheets.background("D4"), BLUE);
    assert_eq!(h.sheets.background("C3"), WHITE);
    // Restore only rewrites backgrounds.
    assert_eq!(h.sheets.note("B2").as_deref(), Some("check this"));
}

#[tokio::test]
async fn overlapping_paint_ranges_share_one_snapshot_row_per_cell() {
    let h = Harness::new();
    h.sheets.set_background("B2", BLUE);

    let painted = tools::paint_cells(
        h.state.clone(),
        vec![paint("A1:B2", "", "#FF0000"), paint("B2:C2", "", "#FF0000")],
    )
    .await
    .unwrap();
    let batch_id = painted.snapshot_batch_id.unwrap();
    assert_eq!(h.store.batch_len(&batch_id), 5);

    tools::restore_snapshot(h.state.clone(), restore_params(&batch_id, None))
        .await
        .unwrap();
    assert_eq!(h.sheets.background("B2"), BLUE);
    assert_eq!(h.sheets.background("C2"), WHITE);
}

#[tokio::test]
async fn failed_paint_keeps_the_snapshot() {
    let h = Harness::new();
    h.sheets.fail_next_batches(true);

    let err = tools::paint_cells(h.state.clone(), vec![paint("A1", "x", "#FF0000")])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TransportError);
    let batch_id = deterministic_batch_id(SPREADSHEET_ID, Some(0), "A1");
    assert_eq!(h.store.batch_len(&batch_id), 1);
}

#[tokio::test]
async fn paint_rejects_bad_colors_before_any_io() {
    let h = Harness::new();
    let err = tools::paint_cells(h.state.clone(), vec![paint("A1", "", "#12345")])
        .await
        .unwrap_err();
    assert_matches!(err, ManglerError::InvalidColor(_));
    assert!(h.store.is_empty());
    assert!(h.sheets.grid_reads().is_empty());
}

#[tokio::test]
async fn reset_whitens_the_whole_grid_and_clears_notes() {
    let h = Harness::new();
    tools::paint_cells(h.state.clone(), vec![paint("B2", "note", "#FF0000")])
        .await
        .unwrap();

    let reset = tools::reset_sheet(h.state.clone(), ResetParams::default())
        .await
        .unwrap();
    assert_eq!(reset.status, ToolStatus::Success);
    assert_eq!((reset.rows, reset.columns), (10, 5));
    assert_eq!(h.sheets.background("B2"), WHITE);
    assert_eq!(h.sheets.note("B2"), None);
    assert_eq!(h.sheets.background("E10"), WHITE);

    let empty_tab = tools::reset_sheet(
        h.state.clone(),
        ResetParams {
            url: Some(OTHER_TAB_URL.into()),
        },
    )
    .await
    .unwrap();
    assert_eq!(empty_tab.status, ToolStatus::NoCells);
}

#[tokio::test]
async fn formula_scan_reports_errors_and_warnings() {
    let h = Harness::new();
    let formula = |f: &str| ExtendedValue {
        formula_value: Some(f.into()),
        ..Default::default()
    };
    h.sheets.set_cell(
        "A1",
        CellData {
            user_entered_value: Some(formula("=1/0")),
            effective_value: Some(ExtendedValue {
                error_value: Some(ErrorValue {
                    kind: Some("DIVIDE_BY_ZERO".into()),
                    message: None,
                }),
                ..Default::default()
            }),
            formatted_value: Some("#DIV/0!".into()),
            ..Default::default()
        },
    );
    h.sheets.set_cell(
        "A2",
        CellData {
            user_entered_value: Some(formula("=VLOOKUP(1,C:C,1,FALSE)")),
            formatted_value: Some("#N/A".into()),
            ..Default::default()
        },
    );
    h.sheets.set_cell(
        "A3",
        CellData {
            user_entered_value: Some(formula("=2*3")),
            formatted_value: Some("6".into()),
            ..Default::default()
        },
    );

    let report = tools::scan_formula_issues(h.state.clone(), FormulaIssuesParams::default())
        .await
        .unwrap();
    assert_eq!(report.sheet, "Model");
    assert_eq!(report.formula_count, 3);
    let found: Vec<(&str, IssueSeverity, &str)> = report
        .issues
        .iter()
        .map(|i| (i.cell.as_str(), i.severity, i.message.as_str()))
        .collect();
    assert_eq!(
        found,
        [
            ("A1", IssueSeverity::Error, "#DIV/0!"),
            ("A2", IssueSeverity::Warning, "#N/A"),
        ]
    );
}

#[tokio::test]
async fn unknown_gid_is_sheet_not_found() {
    let h = Harness::new();
    let err = tools::reset_sheet(
        h.state.clone(),
        ResetParams {
            url: Some("https://docs.google.com/spreadsheets/d/sheet-123/edit#gid=7".into()),
        },
    )
    .await
    .unwrap_err();
    assert_matches!(err, ManglerError::SheetNotFound(_));
    assert_eq!(err.code(), ErrorCode::NotFound);
}
