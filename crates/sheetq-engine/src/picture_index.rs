//! Location index for every picture on a worksheet.
//!
//! Pictures reach a worksheet two ways: floating on the drawing layer (anchored at a cell) and
//! placed inside a cell. The index is built once per load so the row loop never has to scan the
//! drawing layer again.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use sheetq_model::{PictureRef, Worksheet};

use crate::cancel::{CancelSignal, Canceled};

/// Identifies one picture location. Rows and columns are 1-based.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PictureKey {
    pub sheet: String,
    pub row: u32,
    pub col: u32,
}

impl PictureKey {
    pub fn new(sheet: impl Into<String>, row: u32, col: u32) -> Self {
        Self {
            sheet: sheet.into(),
            row,
            col,
        }
    }

    /// Key used by the image cache: `"{sheet}_{row}_{col}"`.
    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PictureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.sheet, self.row, self.col)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PictureSlot {
    /// A drawing-layer picture whose payload is already known.
    Resolved(PictureRef),
    /// The cell reports a picture but its payload must be asked for at read time.
    PresentUnresolved,
}

#[derive(Clone, Debug, Default)]
pub struct PictureIndex {
    sheet: String,
    slots: HashMap<(u32, u32), PictureSlot>,
    /// Columns with a picture below the header row.
    image_columns: HashSet<u32>,
}

impl PictureIndex {
    pub fn new(sheet: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            ..Self::default()
        }
    }

    /// Scan `ws` once: anchored pictures first (first anchor per cell wins), then every cell of
    /// the used range that reports an in-cell picture.
    pub fn build(ws: &dyn Worksheet, cancel: &CancelSignal) -> Result<Self, Canceled> {
        let started = Instant::now();
        let mut index = Self::new(ws.name());

        let mut anchored = 0usize;
        for anchor in ws.pictures() {
            cancel.check()?;
            let row = anchor.row.saturating_add(1);
            let col = anchor.col.saturating_add(1);
            if index.insert_if_absent(row, col, PictureSlot::Resolved(anchor.picture)) {
                anchored += 1;
            }
        }

        let mut in_cell = 0usize;
        if let Some(dim) = ws.dimension() {
            for row in dim.start.row..=dim.end.row {
                for col in dim.start.col..=dim.end.col {
                    cancel.check()?;
                    if index.slots.contains_key(&(row, col)) || !ws.has_cell_picture(row, col) {
                        continue;
                    }
                    index.insert_if_absent(row, col, PictureSlot::PresentUnresolved);
                    in_cell += 1;
                }
            }
        }

        log::debug!(
            "indexed pictures for '{}': {anchored} anchored, {in_cell} in-cell in {:?}",
            index.sheet,
            started.elapsed()
        );
        Ok(index)
    }

    fn insert_if_absent(&mut self, row: u32, col: u32, slot: PictureSlot) -> bool {
        if self.slots.contains_key(&(row, col)) {
            return false;
        }
        self.slots.insert((row, col), slot);
        if row >= 2 {
            self.image_columns.insert(col);
        }
        true
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn key(&self, row: u32, col: u32) -> PictureKey {
        PictureKey::new(self.sheet.clone(), row, col)
    }

    pub fn get(&self, row: u32, col: u32) -> Option<&PictureSlot> {
        self.slots.get(&(row, col))
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        self.slots.contains_key(&(row, col))
    }

    /// Whether any picture sits in column `col` on row 2 or below.
    pub fn is_image_column(&self, col: u32) -> bool {
        self.image_columns.contains(&col)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PictureKey, &PictureSlot)> + '_ {
        self.slots
            .iter()
            .map(|(&(row, col), slot)| (self.key(row, col), slot))
    }
}

#[cfg(test)]
mod tests {
    use sheetq_model::InMemoryWorksheet;

    use super::*;

    fn picture(tag: u8) -> PictureRef {
        PictureRef::new(vec![tag])
    }

    #[test]
    fn first_anchor_wins_and_anchors_are_shifted_to_one_based() {
        let mut ws = InMemoryWorksheet::new("Sheet1");
        ws.set_row(1, &["h"])
            .anchor_picture(1, 0, picture(1))
            .anchor_picture(1, 0, picture(2));

        let index = PictureIndex::build(&ws, &CancelSignal::new()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.get(2, 1),
            Some(&PictureSlot::Resolved(picture(1)))
        );
        assert!(index.is_image_column(1));
    }

    #[test]
    fn in_cell_pictures_do_not_override_anchors() {
        let mut ws = InMemoryWorksheet::new("S");
        ws.set_row(1, &["a", "b"])
            .anchor_picture(2, 0, picture(7))
            .place_in_cell(3, 1, None)
            .place_in_cell(3, 2, None);

        let index = PictureIndex::build(&ws, &CancelSignal::new()).unwrap();
        assert_eq!(index.get(3, 1), Some(&PictureSlot::Resolved(picture(7))));
        assert_eq!(index.get(3, 2), Some(&PictureSlot::PresentUnresolved));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn header_row_pictures_do_not_mark_image_columns() {
        let mut ws = InMemoryWorksheet::new("S");
        ws.set_row(1, &["logo"]).anchor_picture(0, 0, picture(1));
        let index = PictureIndex::build(&ws, &CancelSignal::new()).unwrap();
        assert!(index.contains(1, 1));
        assert!(!index.is_image_column(1));
    }

    #[test]
    fn cache_key_format() {
        let key = PictureKey::new("Sheet 1", 12, 3);
        assert_eq!(key.cache_key(), "Sheet 1_12_3");
    }

    #[test]
    fn build_stops_when_canceled() {
        let mut ws = InMemoryWorksheet::new("S");
        ws.set_row(1, &["a"]).place_in_cell(2, 1, None);
        let cancel = CancelSignal::new();
        cancel.cancel();
        assert_eq!(PictureIndex::build(&ws, &cancel).unwrap_err(), Canceled);
    }
}
