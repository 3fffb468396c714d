use crate::error::{ManglerError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static SPREADSHEET_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)").expect("valid regex"));
static GID: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&#]gid=(\d+)").expect("valid regex"));

/// A spreadsheet plus optional tab, as addressed by a sheet URL or bare id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetTarget {
    pub spreadsheet_id: String,
    pub gid: Option<i64>,
    /// The trimmed string the target was parsed from
    pub source: String,
}

impl SheetTarget {
    /// Accepts a full sheet URL (`.../spreadsheets/d/<id>/edit?gid=<n>`) or a bare id.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ManglerError::invalid_input(
                "sheet URL must be a non-empty string",
            ));
        }

        let spreadsheet_id = SPREADSHEET_ID
            .captures(trimmed)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| trimmed.to_string());

        let gid = match GID.captures(trimmed).and_then(|c| c.get(1)) {
            Some(m) => Some(m.as_str().parse::<i64>().map_err(|_| {
                ManglerError::invalid_input(format!("gid in '{trimmed}' is out of range"))
            })?),
            None => None,
        };

        if spreadsheet_id.contains(char::is_whitespace) {
            return Err(ManglerError::invalid_input(format!(
                "'{trimmed}' is not a spreadsheet URL or id"
            )));
        }

        Ok(Self {
            spreadsheet_id,
            gid,
            source: trimmed.to_string(),
        })
    }
}
