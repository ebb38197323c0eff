use std::sync::Arc;

use thiserror::Error;

use crate::address::CellRef;
use crate::picture::{AnchoredPicture, PictureRef};
use crate::value::SheetCell;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SheetError {
    #[error("worksheet not found: {0}")]
    SheetNotFound(String),
    #[error("cell R{row}C{col} is outside the worksheet")]
    CellOutOfRange { row: u32, col: u32 },
    #[error("{0}")]
    Backend(String),
}

/// The used rectangle of a worksheet (inclusive, 1-based).
///
/// The first row of the rectangle holds the column headers; every row below it is a data row.
/// A rectangle built field by field with its corners swapped is empty.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SheetDimension {
    pub start: CellRef,
    pub end: CellRef,
}

impl SheetDimension {
    pub fn new(start: CellRef, end: CellRef) -> Self {
        Self {
            start: CellRef::new(start.row.min(end.row), start.col.min(end.col)),
            end: CellRef::new(start.row.max(end.row), start.col.max(end.col)),
        }
    }

    pub fn rows(&self) -> u32 {
        extent(self.start.row, self.end.row)
    }

    pub fn columns(&self) -> u32 {
        extent(self.start.col, self.end.col)
    }

    pub fn header_row(&self) -> u32 {
        self.start.row
    }

    /// Number of rows below the header row.
    pub fn data_rows(&self) -> u32 {
        self.rows().saturating_sub(1)
    }

    pub fn first_data_row(&self) -> u32 {
        self.start.row.saturating_add(1)
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.start.row && row <= self.end.row && col >= self.start.col && col <= self.end.col
    }
}

fn extent(first: u32, last: u32) -> u32 {
    last.checked_sub(first).map_or(0, |span| span.saturating_add(1))
}

/// Read access to one worksheet, as needed by the loader.
///
/// Rows and columns are 1-based. Implementations are shared with a background loader thread, so
/// they must be `Send + Sync`; none of the methods take `&mut self`.
pub trait Worksheet: Send + Sync {
    fn name(&self) -> &str;

    /// The used rectangle, or `None` when the sheet has no cells at all.
    fn dimension(&self) -> Option<SheetDimension>;

    fn cell(&self, row: u32, col: u32) -> Result<SheetCell, SheetError>;

    fn is_row_hidden(&self, row: u32) -> bool;

    /// Whether the cell itself carries a picture (e.g. Excel "Place in Cell" images), as opposed
    /// to a picture floating on the drawing layer.
    fn has_cell_picture(&self, row: u32, col: u32) -> bool;

    /// Payload for a cell-level picture, when it can be extracted.
    fn cell_picture(&self, row: u32, col: u32) -> Option<PictureRef>;

    /// Pictures on the drawing layer with their 0-based anchors, in document order.
    fn pictures(&self) -> Box<dyn Iterator<Item = AnchoredPicture> + '_>;
}

/// A workbook that can hand out worksheets by name.
pub trait WorkbookSource: Send + Sync {
    fn sheet_names(&self) -> Vec<String>;

    fn worksheet(&self, name: &str) -> Result<Arc<dyn Worksheet>, SheetError>;
}
