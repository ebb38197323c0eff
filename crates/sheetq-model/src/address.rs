use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest 1-based row number a worksheet may address.
pub const MAX_ROWS: u32 = 1_048_576;
/// Largest 1-based column number a worksheet may address (`XFD`).
pub const MAX_COLS: u32 = 16_384;

/// A reference to a single worksheet cell.
///
/// Rows and columns are **1-based**, matching what users see in the sheet and what the loader
/// uses for picture keys. Drawing anchors are 0-based and are converted at the boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum A1ParseError {
    #[error("empty A1 reference")]
    Empty,
    #[error("missing column in A1 reference")]
    MissingColumn,
    #[error("missing row in A1 reference")]
    MissingRow,
    #[error("column out of range in A1 reference")]
    InvalidColumn,
    #[error("row out of range in A1 reference")]
    InvalidRow,
}

impl CellRef {
    #[inline]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Build a reference from a 0-based drawing anchor.
    #[inline]
    pub const fn from_anchor(row0: u32, col0: u32) -> Self {
        Self {
            row: row0 + 1,
            col: col0 + 1,
        }
    }

    pub fn to_a1(self) -> String {
        format!("{}{}", column_letters(self.col), self.row)
    }

    /// Parse `B7`, `$B$7` or `b7`.
    pub fn from_a1(a1: &str) -> Result<Self, A1ParseError> {
        let s: String = a1.trim().chars().filter(|c| *c != '$').collect();
        if s.is_empty() {
            return Err(A1ParseError::Empty);
        }

        let split = s
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(s.len());
        let (letters, digits) = s.split_at(split);
        if letters.is_empty() {
            return Err(A1ParseError::MissingColumn);
        }
        if digits.is_empty() {
            return Err(A1ParseError::MissingRow);
        }

        let mut col: u32 = 0;
        for b in letters.bytes() {
            let digit = u32::from(b.to_ascii_uppercase() - b'A') + 1;
            col = col
                .checked_mul(26)
                .and_then(|c| c.checked_add(digit))
                .ok_or(A1ParseError::InvalidColumn)?;
        }
        if col == 0 || col > MAX_COLS {
            return Err(A1ParseError::InvalidColumn);
        }

        let row: u32 = digits.parse().map_err(|_| A1ParseError::InvalidRow)?;
        if row == 0 || row > MAX_ROWS {
            return Err(A1ParseError::InvalidRow);
        }

        Ok(Self { row, col })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// Convert a 1-based column number into its letter form (`1 -> A`, `28 -> AB`).
pub fn column_letters(col: u32) -> String {
    let mut n = col;
    let mut out = Vec::<u8>::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

/// Parse an A1 area (`A1:D20`) or a single cell (`C3`) into normalized corners.
pub fn parse_a1_area(area: &str) -> Result<(CellRef, CellRef), A1ParseError> {
    let (a, b) = match area.trim().split_once(':') {
        Some((a, b)) => (CellRef::from_a1(a)?, CellRef::from_a1(b)?),
        None => {
            let cell = CellRef::from_a1(area)?;
            (cell, cell)
        }
    };
    Ok((
        CellRef::new(a.row.min(b.row), a.col.min(b.col)),
        CellRef::new(a.row.max(b.row), a.col.max(b.col)),
    ))
}
