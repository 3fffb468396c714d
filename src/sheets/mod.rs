//! Spreadsheet reader/writer boundary.
//!
//! Pipelines talk to [`SheetsApi`]; [`client::GoogleSheetsClient`] is the
//! REST implementation and tests substitute scripted fakes.

pub mod auth;
pub mod client;
pub mod model;
pub mod url;

use crate::address::{CellAddress, CellRange};
use crate::color::{Color, WHITE};
use crate::error::{ManglerError, Result};
use async_trait::async_trait;
use model::{
    BatchRequest, CellData, CellFormat, CellUpdate, GridRange, RepeatCellRequest,
    SheetProperties, Spreadsheet,
};

pub use client::GoogleSheetsClient;
pub use url::SheetTarget;

pub const BACKGROUND_FIELDS: &str = "userEnteredFormat.backgroundColor";
pub const BACKGROUND_AND_NOTE_FIELDS: &str = "userEnteredFormat.backgroundColor,note";

/// Which cell properties a grid read asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridFields {
    /// Background colors only
    Colors,
    /// Entered values plus background colors, for formula/literal classification
    Classification,
    /// Entered, effective and formatted values, for formula issue scans
    Formulas,
}

impl GridFields {
    pub fn mask(&self) -> &'static str {
        match self {
            GridFields::Colors => {
                "sheets(data(startRow,startColumn,rowData(values(userEnteredFormat.backgroundColor))),properties(sheetId,title))"
            }
            GridFields::Classification => {
                "sheets(data(startRow,startColumn,rowData(values(userEnteredValue,userEnteredFormat.backgroundColor))),properties(sheetId,title))"
            }
            GridFields::Formulas => {
                "sheets(data(startRow,startColumn,rowData(values(userEnteredValue,effectiveValue,formattedValue))),properties(sheetId,title))"
            }
        }
    }
}

pub const METADATA_FIELDS: &str =
    "sheets(properties(sheetId,title,gridProperties(rowCount,columnCount)))";

/// One cell of a grid read, placed at its absolute address.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceCell {
    pub address: CellAddress,
    pub data: CellData,
}

/// Cells returned by a grid read, in the order the API reported them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridSlice {
    pub cells: Vec<SliceCell>,
}

impl GridSlice {
    /// Re-base every data block of the first returned sheet onto absolute
    /// addresses using the block's reported start row and column.
    pub fn from_spreadsheet(spreadsheet: Spreadsheet) -> Self {
        let mut cells = Vec::new();
        let Some(sheet) = spreadsheet.sheets.into_iter().next() else {
            return Self { cells };
        };
        for block in sheet.data {
            for (row_offset, row) in block.row_data.into_iter().enumerate() {
                for (col_offset, data) in row.values.into_iter().enumerate() {
                    let address = CellAddress::from_grid_index(
                        block.start_row + row_offset as u32,
                        block.start_column + col_offset as u32,
                    );
                    cells.push(SliceCell { address, data });
                }
            }
        }
        Self { cells }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, address: &CellAddress) -> Option<&CellData> {
        self.cells
            .iter()
            .find(|c| &c.address == address)
            .map(|c| &c.data)
    }

    /// Background color of `address`, white when the read did not return it.
    pub fn color_at(&self, address: &CellAddress) -> Color {
        Color::from_cell(self.get(address))
    }
}

#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn fetch_spreadsheet_metadata(&self, spreadsheet_id: &str)
    -> Result<Vec<SheetProperties>>;

    /// `range` is an A1 range qualified with the sheet title, or a bare
    /// quoted title for the whole sheet.
    async fn fetch_grid_slice(
        &self,
        spreadsheet_id: &str,
        range: &str,
        fields: GridFields,
    ) -> Result<GridSlice>;

    /// Applies every request as a single batch; nothing is applied on error.
    async fn apply_batched_formatting(
        &self,
        spreadsheet_id: &str,
        requests: Vec<BatchRequest>,
    ) -> Result<()>;
}

/// Pick the tab addressed by `gid`, or the first tab when no gid was given.
pub fn resolve_sheet(sheets: Vec<SheetProperties>, gid: Option<i64>) -> Result<SheetProperties> {
    if sheets.is_empty() {
        return Err(ManglerError::SheetNotFound(
            "no sheets available in spreadsheet".into(),
        ));
    }
    match gid {
        None => Ok(sheets.into_iter().next().unwrap_or_default()),
        Some(gid) => sheets
            .into_iter()
            .find(|s| s.sheet_id == gid)
            .ok_or_else(|| ManglerError::SheetNotFound(format!("no sheet found with gid={gid}"))),
    }
}

/// `'Title'` with embedded quotes doubled.
pub fn quoted_title(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

pub fn qualified_range(title: &str, range: &CellRange) -> String {
    format!("{}!{}", quoted_title(title), range)
}

pub fn grid_range(sheet_id: i64, range: &CellRange) -> GridRange {
    GridRange {
        sheet_id,
        start_row_index: range.start.row_index(),
        end_row_index: range.end.row_index() + 1,
        start_column_index: range.start.column_index(),
        end_column_index: range.end.column_index() + 1,
    }
}

fn background(color: Color) -> CellFormat {
    CellFormat {
        background_color: Some(color.to_api()),
    }
}

/// Overwrite one cell's background, leaving its note alone.
pub fn color_request(sheet_id: i64, cell: CellAddress, color: Color) -> BatchRequest {
    BatchRequest {
        repeat_cell: RepeatCellRequest {
            range: grid_range(sheet_id, &CellRange::single(cell)),
            cell: CellUpdate {
                user_entered_format: Some(background(color)),
                note: None,
            },
            fields: BACKGROUND_FIELDS.to_string(),
        },
    }
}

/// Paint a rectangle and set its note.
pub fn paint_request(sheet_id: i64, range: &CellRange, color: Color, note: &str) -> BatchRequest {
    BatchRequest {
        repeat_cell: RepeatCellRequest {
            range: grid_range(sheet_id, range),
            cell: CellUpdate {
                user_entered_format: Some(background(color)),
                note: Some(note.to_string()),
            },
            fields: BACKGROUND_AND_NOTE_FIELDS.to_string(),
        },
    }
}

/// White background and no note across the whole `rows` x `columns` grid.
pub fn reset_request(sheet_id: i64, rows: u32, columns: u32) -> BatchRequest {
    BatchRequest {
        repeat_cell: RepeatCellRequest {
            range: GridRange {
                sheet_id,
                start_row_index: 0,
                end_row_index: rows,
                start_column_index: 0,
                end_column_index: columns,
            },
            cell: CellUpdate {
                user_entered_format: Some(background(WHITE)),
                note: None,
            },
            fields: BACKGROUND_AND_NOTE_FIELDS.to_string(),
        },
    }
}
