//! Formula issue scan: formulas that evaluate to an error, or render as one.

use super::{resolve_target, target_url};
use crate::error::Result;
use crate::logging::tool_span;
use crate::sheets::model::CellData;
use crate::sheets::{GridFields, GridSlice, quoted_title};
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::Display;
use tracing::{Instrument, info};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormulaIssuesParams {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaIssue {
    pub cell: String,
    pub formula: String,
    pub severity: IssueSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormulaIssuesResponse {
    pub sheet: String,
    pub formula_count: usize,
    pub issues: Vec<FormulaIssue>,
}

fn issue_for(cell: &CellData) -> Option<(IssueSeverity, String)> {
    let formatted = cell.formatted_value.as_deref().filter(|v| !v.is_empty());
    if let Some(error) = cell.effective_value.as_ref().and_then(|v| v.error_value.as_ref()) {
        let message = error
            .message
            .as_deref()
            .filter(|m| !m.is_empty())
            .or(formatted)
            .or(error.kind.as_deref().filter(|k| !k.is_empty()))
            .unwrap_or("Formula error");
        return Some((IssueSeverity::Error, message.to_string()));
    }
    formatted
        .filter(|v| v.starts_with('#'))
        .map(|v| (IssueSeverity::Warning, v.to_string()))
}

/// Count formula cells and collect their issues, in grid order.
pub fn collect_issues(slice: &GridSlice) -> (usize, Vec<FormulaIssue>) {
    let mut formula_count = 0;
    let mut issues = Vec::new();
    for cell in &slice.cells {
        let Some(formula) = cell.data.formula() else {
            continue;
        };
        formula_count += 1;
        if let Some((severity, message)) = issue_for(&cell.data) {
            issues.push(FormulaIssue {
                cell: cell.address.label(),
                formula: formula.to_string(),
                severity,
                message,
            });
        }
    }
    (formula_count, issues)
}

pub async fn scan_formula_issues(
    state: Arc<AppState>,
    params: FormulaIssuesParams,
) -> Result<FormulaIssuesResponse> {
    async move {
        let url = target_url(&state, params.url)?;
        let sheet = resolve_target(state.sheets(), &url).await?;
        let slice = state
            .sheets()
            .fetch_grid_slice(
                sheet.spreadsheet_id(),
                &quoted_title(sheet.title()),
                GridFields::Formulas,
            )
            .await?;

        let (formula_count, issues) = collect_issues(&slice);
        info!(
            spreadsheet_id = sheet.spreadsheet_id(),
            sheet = sheet.title(),
            formula_count,
            issues = issues.len(),
            "scanned formulas"
        );

        Ok(FormulaIssuesResponse {
            sheet: sheet.title().to_string(),
            formula_count,
            issues,
        })
    }
    .instrument(tool_span("formula_issues"))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::CellAddress;
    use crate::sheets::SliceCell;
    use crate::sheets::model::{ErrorValue, ExtendedValue};

    fn formula_cell(
        label: &str,
        formatted: Option<&str>,
        error: Option<ErrorValue>,
    ) -> SliceCell {
        SliceCell {
            address: CellAddress::parse(label).unwrap(),
            data: CellData {
                user_entered_value: Some(ExtendedValue {
                    formula_value: Some("=A1/0".into()),
                    ..Default::default()
                }),
                effective_value: error.map(|e| ExtendedValue {
                    error_value: Some(e),
                    ..Default::default()
                }),
                formatted_value: formatted.map(str::to_string),
                ..Default::default()
            },
        }
    }

    #[test]
    fn error_message_fallback_chain() {
        let slice = GridSlice {
            cells: vec![
                formula_cell(
                    "A1",
                    Some("#DIV/0!"),
                    Some(ErrorValue {
                        kind: Some("DIVIDE_BY_ZERO".into()),
                        message: Some("Function DIVIDE parameter 2 cannot be zero.".into()),
                    }),
                ),
                formula_cell(
                    "A2",
                    Some("#REF!"),
                    Some(ErrorValue {
                        kind: Some("REF".into()),
                        message: None,
                    }),
                ),
                formula_cell(
                    "A3",
                    None,
                    Some(ErrorValue {
                        kind: Some("NAME".into()),
                        message: None,
                    }),
                ),
                formula_cell("A4", None, Some(ErrorValue::default())),
            ],
        };
        let (count, issues) = collect_issues(&slice);
        assert_eq!(count, 4);
        let messages: Vec<&str> = issues.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(
            messages,
            [
                "Function DIVIDE parameter 2 cannot be zero.",
                "#REF!",
                "NAME",
                "Formula error"
            ]
        );
        assert!(issues.iter().all(|i| i.severity == IssueSeverity::Error));
    }

    #[test]
    fn hash_prefixed_display_is_a_warning() {
        let slice = GridSlice {
            cells: vec![
                formula_cell("B1", Some("#N/A"), None),
                formula_cell("B2", Some("42"), None),
                SliceCell {
                    address: CellAddress::parse("B3").unwrap(),
                    data: CellData {
                        formatted_value: Some("#not a formula".into()),
                        ..Default::default()
                    },
                },
            ],
        };
        let (count, issues) = collect_issues(&slice);
        assert_eq!(count, 2);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].cell, "B1");
        assert_eq!(issues[0].severity, IssueSeverity::Warning);
        assert_eq!(issues[0].severity.to_string(), "warning");
    }
}
