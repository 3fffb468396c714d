//! A1 address codec.
//!
//! Rows and columns are 1-indexed everywhere in this module (`A1` is row 1,
//! column 1). The Sheets grid API speaks 0-indexed half-open ranges; the
//! `*_index` accessors convert at that boundary.

use crate::error::{ManglerError, Result};
use indexmap::IndexSet;
use std::fmt;
use std::str::FromStr;

/// Largest column accepted when parsing (`XFD` in Excel terms is 16384;
/// Sheets allows 18278 = `ZZZ`).
pub const MAX_COLUMN: u32 = 18_278;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    pub row: u32,
    pub column: u32,
}

impl CellAddress {
    pub fn new(row: u32, column: u32) -> Result<Self> {
        if row < 1 || column < 1 {
            return Err(ManglerError::InvalidIndex { row, column });
        }
        Ok(Self { row, column })
    }

    /// Build from 0-indexed grid offsets as reported by the Sheets API.
    pub fn from_grid_index(row_index: u32, column_index: u32) -> Self {
        Self {
            row: row_index + 1,
            column: column_index + 1,
        }
    }

    pub fn row_index(&self) -> u32 {
        self.row - 1
    }

    pub fn column_index(&self) -> u32 {
        self.column - 1
    }

    pub fn label(&self) -> String {
        format!("{}{}", column_label(self.column), self.row)
    }

    /// Parse `[A-Z]+[0-9]+`. Input is expected already uppercased and trimmed;
    /// see [`normalize_reference`].
    pub fn parse(label: &str) -> Result<Self> {
        let invalid = || ManglerError::InvalidReference(label.to_string());

        let split = label
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (letters, digits) = label.split_at(split);
        if letters.is_empty()
            || !letters.bytes().all(|b| b.is_ascii_uppercase())
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let column = column_number(letters).ok_or_else(invalid)?;
        let row: u32 = digits.parse().map_err(|_| invalid())?;
        if row < 1 {
            return Err(invalid());
        }
        Ok(Self { row, column })
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_label(self.column), self.row)
    }
}

impl FromStr for CellAddress {
    type Err = ManglerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Convert a 1-indexed column number to letters (1 = A, 27 = AA).
/// Returns an empty string for 0.
pub fn column_label(column: u32) -> String {
    let mut column = column;
    let mut name = String::new();
    while column > 0 {
        let rem = ((column - 1) % 26) as u8;
        name.insert(0, (b'A' + rem) as char);
        column = (column - 1) / 26;
    }
    name
}

fn column_number(letters: &str) -> Option<u32> {
    let mut index: u32 = 0;
    for b in letters.bytes() {
        index = index.checked_mul(26)?.checked_add((b - b'A' + 1) as u32)?;
        if index > MAX_COLUMN {
            return None;
        }
    }
    Some(index)
}

/// Render a 1-indexed (row, column) pair as an A1 label.
pub fn address_to_label(row: u32, column: u32) -> Result<String> {
    Ok(CellAddress::new(row, column)?.label())
}

/// Parse an A1 label into a 1-indexed (row, column) pair.
pub fn label_to_address(label: &str) -> Result<(u32, u32)> {
    let address = CellAddress::parse(label)?;
    Ok((address.row, address.column))
}

/// Trim and uppercase a user-supplied cell or range reference.
pub fn normalize_reference(reference: &str) -> String {
    reference.trim().to_ascii_uppercase()
}

/// Rectangular span; a single cell is the degenerate case where start == end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start: CellAddress,
    pub end: CellAddress,
}

impl CellRange {
    pub fn single(cell: CellAddress) -> Self {
        Self {
            start: cell,
            end: cell,
        }
    }

    pub fn parse(reference: &str) -> Result<Self> {
        let mut parts = reference.split(':');
        let start = parts.next().unwrap_or_default();
        let end = parts.next();
        if parts.next().is_some() {
            return Err(ManglerError::InvalidReference(reference.to_string()));
        }

        let start = CellAddress::parse(start)?;
        let end = match end {
            Some(end) => CellAddress::parse(end)?,
            None => start,
        };
        if end.row < start.row || end.column < start.column {
            return Err(ManglerError::InvertedRange(reference.to_string()));
        }
        Ok(Self { start, end })
    }

    pub fn rows(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn columns(&self) -> u32 {
        self.end.column - self.start.column + 1
    }

    pub fn cell_count(&self) -> u64 {
        self.rows() as u64 * self.columns() as u64
    }

    pub fn contains(&self, cell: &CellAddress) -> bool {
        (self.start.row..=self.end.row).contains(&cell.row)
            && (self.start.column..=self.end.column).contains(&cell.column)
    }

    /// Row-major: top-to-bottom, left-to-right.
    pub fn cells(&self) -> impl Iterator<Item = CellAddress> + '_ {
        (self.start.row..=self.end.row).flat_map(move |row| {
            (self.start.column..=self.end.column).map(move |column| CellAddress { row, column })
        })
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

impl FromStr for CellRange {
    type Err = ManglerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Expand `"A1"` or `"A1:B5"` into its cells in row-major order.
pub fn expand_range(reference: &str) -> Result<Vec<CellAddress>> {
    Ok(CellRange::parse(reference)?.cells().collect())
}

/// Expand several ranges, dropping repeats while keeping first-seen order.
pub fn union_cells<I, S>(references: I) -> Result<Vec<CellAddress>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = IndexSet::new();
    for reference in references {
        for cell in CellRange::parse(reference.as_ref())?.cells() {
            seen.insert(cell);
        }
    }
    Ok(seen.into_iter().collect())
}
