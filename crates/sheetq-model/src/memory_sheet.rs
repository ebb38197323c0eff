//! Worksheet backends that live entirely in memory.
//!
//! These are used by tests across the workspace and by callers that already hold tabular data
//! (e.g. a CSV import) and want to run it through the loader.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::address::CellRef;
use crate::picture::{AnchoredPicture, PictureRef};
use crate::sheet::{SheetDimension, SheetError, Worksheet, WorkbookSource};
use crate::value::SheetCell;

#[derive(Debug, Clone, Default)]
pub struct InMemoryWorksheet {
    name: String,
    cells: BTreeMap<(u32, u32), SheetCell>,
    hidden_rows: HashSet<u32>,
    cell_pictures: HashMap<(u32, u32), Option<PictureRef>>,
    pictures: Vec<AnchoredPicture>,
    broken_cells: HashMap<(u32, u32), String>,
    dimension: Option<SheetDimension>,
}

impl InMemoryWorksheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn set(&mut self, row: u32, col: u32, cell: impl Into<SheetCell>) -> &mut Self {
        self.cells.insert((row, col), cell.into());
        self
    }

    /// Fill `row` starting at column 1 with text values. Empty strings leave the cell empty.
    pub fn set_row(&mut self, row: u32, values: &[&str]) -> &mut Self {
        for (idx, value) in values.iter().enumerate() {
            if !value.is_empty() {
                self.set(row, idx as u32 + 1, *value);
            }
        }
        self
    }

    pub fn hide_row(&mut self, row: u32) -> &mut Self {
        self.hidden_rows.insert(row);
        self
    }

    /// Put a picture on the drawing layer, anchored at a 0-based cell.
    pub fn anchor_picture(&mut self, row0: u32, col0: u32, picture: PictureRef) -> &mut Self {
        self.pictures.push(AnchoredPicture {
            row: row0,
            col: col0,
            picture,
        });
        self
    }

    /// Mark a cell as carrying an in-cell picture. `None` models a picture whose payload cannot
    /// be extracted.
    pub fn place_in_cell(&mut self, row: u32, col: u32, picture: Option<PictureRef>) -> &mut Self {
        self.cell_pictures.insert((row, col), picture);
        self
    }

    /// Make reads of one cell fail with a backend error.
    pub fn break_cell(&mut self, row: u32, col: u32, message: impl Into<String>) -> &mut Self {
        self.broken_cells.insert((row, col), message.into());
        self
    }

    /// Override the computed used range.
    pub fn with_dimension(&mut self, dimension: SheetDimension) -> &mut Self {
        self.dimension = Some(dimension);
        self
    }

    fn computed_dimension(&self) -> Option<SheetDimension> {
        let coords = self
            .cells
            .keys()
            .chain(self.cell_pictures.keys())
            .chain(self.broken_cells.keys())
            .copied();

        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (row, col) in coords {
            bounds = Some(match bounds {
                None => (row, col, row, col),
                Some((r0, c0, r1, c1)) => (r0.min(row), c0.min(col), r1.max(row), c1.max(col)),
            });
        }
        bounds.map(|(r0, c0, r1, c1)| SheetDimension::new(CellRef::new(r0, c0), CellRef::new(r1, c1)))
    }
}

impl Worksheet for InMemoryWorksheet {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> Option<SheetDimension> {
        self.dimension.or_else(|| self.computed_dimension())
    }

    fn cell(&self, row: u32, col: u32) -> Result<SheetCell, SheetError> {
        if row == 0 || col == 0 {
            return Err(SheetError::CellOutOfRange { row, col });
        }
        if let Some(message) = self.broken_cells.get(&(row, col)) {
            return Err(SheetError::Backend(message.clone()));
        }
        Ok(self.cells.get(&(row, col)).cloned().unwrap_or_default())
    }

    fn is_row_hidden(&self, row: u32) -> bool {
        self.hidden_rows.contains(&row)
    }

    fn has_cell_picture(&self, row: u32, col: u32) -> bool {
        self.cell_pictures.contains_key(&(row, col))
    }

    fn cell_picture(&self, row: u32, col: u32) -> Option<PictureRef> {
        self.cell_pictures.get(&(row, col)).cloned().flatten()
    }

    fn pictures(&self) -> Box<dyn Iterator<Item = AnchoredPicture> + '_> {
        Box::new(self.pictures.iter().cloned())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkbook {
    sheets: Vec<Arc<InMemoryWorksheet>>,
}

impl InMemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sheet: InMemoryWorksheet) -> &mut Self {
        self.sheets.push(Arc::new(sheet));
        self
    }
}

impl WorkbookSource for InMemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets
            .iter()
            .map(|s| s.name.clone())
            .filter(|name| !name.trim().is_empty())
            .collect()
    }

    fn worksheet(&self, name: &str) -> Result<Arc<dyn Worksheet>, SheetError> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .map(|s| Arc::clone(s) as Arc<dyn Worksheet>)
            .ok_or_else(|| SheetError::SheetNotFound(name.to_string()))
    }
}
