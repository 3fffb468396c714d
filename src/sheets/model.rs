//! Wire types for the subset of the Sheets v4 REST API the service uses.
//!
//! Field names follow the API's camelCase JSON. Every field is optional on
//! the read side because the API omits defaults and anything not requested
//! through a `fields` mask.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiColor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub red: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub green: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blue: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellFormat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<ApiColor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorValue {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_value: Option<ErrorValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_entered_value: Option<ExtendedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_value: Option<ExtendedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_entered_format: Option<CellFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_format: Option<CellFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CellData {
    pub fn formula(&self) -> Option<&str> {
        self.user_entered_value
            .as_ref()
            .and_then(|v| v.formula_value.as_deref())
            .filter(|f| !f.is_empty())
    }

    pub fn number(&self) -> Option<f64> {
        self.user_entered_value.as_ref().and_then(|v| v.number_value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowData {
    #[serde(default)]
    pub values: Vec<CellData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridData {
    #[serde(default)]
    pub start_row: u32,
    #[serde(default)]
    pub start_column: u32,
    #[serde(default)]
    pub row_data: Vec<RowData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridProperties {
    #[serde(default)]
    pub row_count: Option<u32>,
    #[serde(default)]
    pub column_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    #[serde(default)]
    pub sheet_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub grid_properties: Option<GridProperties>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    #[serde(default)]
    pub properties: SheetProperties,
    #[serde(default)]
    pub data: Vec<GridData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spreadsheet {
    #[serde(default)]
    pub sheets: Vec<Sheet>,
}

/// Half-open, 0-indexed grid rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRange {
    pub sheet_id: i64,
    pub start_row_index: u32,
    pub end_row_index: u32,
    pub start_column_index: u32,
    pub end_column_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatCellRequest {
    pub range: GridRange,
    pub cell: CellUpdate,
    pub fields: String,
}

/// Cell payload for a `repeatCell`. `note` is serialized even when `None`
/// so that a field mask including `note` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_entered_format: Option<CellFormat>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub repeat_cell: RepeatCellRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateBody {
    pub requests: Vec<BatchRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_sparse_grid_payload() {
        let payload = json!({
            "sheets": [{
                "properties": {"sheetId": 7, "title": "Model"},
                "data": [{
                    "startRow": 2,
                    "startColumn": 1,
                    "rowData": [
                        {"values": [
                            {"userEnteredValue": {"formulaValue": "=SUM(B1:B2)"}},
                            {},
                            {"userEnteredValue": {"numberValue": 42.0},
                             "userEnteredFormat": {"backgroundColor": {"red": 1.0}}}
                        ]},
                        {}
                    ]
                }]
            }]
        });
        let parsed: Spreadsheet = serde_json::from_value(payload).unwrap();
        let sheet = &parsed.sheets[0];
        assert_eq!(sheet.properties.sheet_id, 7);
        let grid = &sheet.data[0];
        assert_eq!((grid.start_row, grid.start_column), (2, 1));
        let row = &grid.row_data[0];
        assert_eq!(row.values[0].formula(), Some("=SUM(B1:B2)"));
        assert_eq!(row.values[1], CellData::default());
        assert_eq!(row.values[2].number(), Some(42.0));
        assert!(grid.row_data[1].values.is_empty());
    }

    #[test]
    fn cell_update_serializes_null_note() {
        let update = CellUpdate {
            user_entered_format: None,
            note: None,
        };
        assert_eq!(serde_json::to_value(update).unwrap(), json!({"note": null}));
    }
}
