//! Color codec: hex strings, Sheets API colors and the overlay palette.

use crate::error::{ManglerError, Result};
use crate::sheets::model::{ApiColor, CellData, CellFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// RGB with each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

pub const WHITE: Color = Color {
    red: 1.0,
    green: 1.0,
    blue: 1.0,
};

/// Overlay for cells whose entered value is a formula (light green).
pub const FORMULA_COLOR: Color = Color {
    red: 0.75,
    green: 0.92,
    blue: 0.75,
};

/// Overlay for cells holding a bare numeric literal (light orange).
pub const LITERAL_COLOR: Color = Color {
    red: 0.98,
    green: 0.8,
    blue: 0.5,
};

impl Default for Color {
    fn default() -> Self {
        WHITE
    }
}

impl Color {
    pub fn new(red: f64, green: f64, blue: f64) -> Self {
        Self {
            red: red.clamp(0.0, 1.0),
            green: green.clamp(0.0, 1.0),
            blue: blue.clamp(0.0, 1.0),
        }
    }

    /// Accepts `#RRGGBB` or `RRGGBB`, case-insensitive.
    pub fn from_hex(value: &str) -> Result<Self> {
        let invalid = || ManglerError::InvalidColor(value.to_string());
        let hex = value.strip_prefix('#').unwrap_or(value);
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map(|byte| byte as f64 / 255.0)
                .map_err(|_| invalid())
        };
        Ok(Self {
            red: channel(0)?,
            green: channel(2)?,
            blue: channel(4)?,
        })
    }

    pub fn to_hex(&self) -> String {
        let byte = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!(
            "#{:02X}{:02X}{:02X}",
            byte(self.red),
            byte(self.green),
            byte(self.blue)
        )
    }

    /// Missing format, missing background or a missing channel all read as
    /// white's value for that channel.
    pub fn from_cell_format(format: Option<&CellFormat>) -> Self {
        match format.and_then(|f| f.background_color.as_ref()) {
            Some(color) => Self::from_api(color),
            None => WHITE,
        }
    }

    /// Background the user set on a grid cell. The effective format is
    /// ignored: it carries conditional formatting, which must not be written
    /// back as a static color on restore.
    pub fn from_cell(cell: Option<&CellData>) -> Self {
        Self::from_cell_format(cell.and_then(|c| c.user_entered_format.as_ref()))
    }

    pub fn from_api(color: &ApiColor) -> Self {
        Self {
            red: color.red.unwrap_or(1.0),
            green: color.green.unwrap_or(1.0),
            blue: color.blue.unwrap_or(1.0),
        }
    }

    pub fn to_api(self) -> ApiColor {
        ApiColor {
            red: Some(self.red),
            green: Some(self.green),
            blue: Some(self.blue),
            alpha: None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The two overlay colors used by formula visualization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub formula: Color,
    pub literal: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            formula: FORMULA_COLOR,
            literal: LITERAL_COLOR,
        }
    }
}
