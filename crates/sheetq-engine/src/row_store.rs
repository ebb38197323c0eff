use std::collections::TryReserveError;
use std::fmt;

use serde::Serialize;
use sheetq_model::DecodedImage;
use thiserror::Error;

use crate::columns::ColumnMeta;

/// Header of the leading row-number column.
pub const ROW_NUMBER_HEADER: &str = "#";

#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Text(String),
    /// A picture cell. `image` is `None` when the picture could not be shown.
    ImagePair {
        image: Option<DecodedImage>,
        caption: String,
    },
    Empty,
    /// A cell that failed to load; the reason is kept so the row still renders.
    ErrorMarker(String),
}

impl CellValue {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(text)
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.is_empty(),
            CellValue::ImagePair { image, caption } => image.is_none() && caption.is_empty(),
            CellValue::ErrorMarker(_) => false,
        }
    }

    /// Text a query term is matched against. Picture cells match on their caption.
    pub fn search_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => Some(text),
            CellValue::ImagePair { caption, .. } => Some(caption),
            CellValue::ErrorMarker(reason) => Some(reason),
            CellValue::Empty => None,
        }
    }

    pub fn image(&self) -> Option<&DecodedImage> {
        match self {
            CellValue::ImagePair { image, .. } => image.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(text) => f.write_str(text),
            CellValue::ImagePair {
                image: Some(image),
                caption,
            } => {
                write!(f, "[image {}x{}]", image.width(), image.height())?;
                if !caption.is_empty() {
                    write!(f, " {caption}")?;
                }
                Ok(())
            }
            CellValue::ImagePair {
                image: None,
                caption,
            } => f.write_str(caption),
            CellValue::Empty => Ok(()),
            CellValue::ErrorMarker(reason) => write!(f, "#ERR({reason})"),
        }
    }
}

/// One loaded row. `display_row` is the leading row-number column.
#[derive(Clone, Debug, PartialEq)]
pub struct RowRecord {
    pub display_row: u32,
    pub cells: Vec<CellValue>,
}

impl RowRecord {
    pub fn new(display_row: u32, cells: Vec<CellValue>) -> Self {
        Self { display_row, cells }
    }

    /// Number of columns including the row number.
    pub fn column_count(&self) -> usize {
        self.cells.len() + 1
    }

    pub fn has_data(&self) -> bool {
        self.cells.iter().any(|cell| !cell.is_empty())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnKind {
    Text,
    /// Holds pictures alongside text.
    Mixed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreColumn {
    pub header: String,
    pub kind: ColumnKind,
}

impl StoreColumn {
    /// Store layout for `meta`. Picture columns are only `Mixed` when pictures are being loaded.
    pub fn from_meta(meta: &ColumnMeta, show_images: bool) -> Self {
        Self {
            header: meta.header.clone(),
            kind: if show_images && meta.is_image {
                ColumnKind::Mixed
            } else {
                ColumnKind::Text
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row {index} has {found} cells, expected {expected}")]
    WidthMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("out of memory appending {rows} rows: {source}")]
    OutOfMemory {
        rows: usize,
        #[source]
        source: TryReserveError,
    },
}

/// Ordered table of loaded rows.
///
/// Rows only enter the store a whole batch at a time; a rejected batch leaves the store
/// untouched.
#[derive(Clone, Debug, Default)]
pub struct RowStore {
    columns: Vec<StoreColumn>,
    rows: Vec<RowRecord>,
}

impl RowStore {
    pub fn new(columns: Vec<StoreColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Replace the column layout and drop every row.
    pub fn reset_columns(&mut self, columns: Vec<StoreColumn>) {
        self.columns = columns;
        self.rows = Vec::new();
    }

    pub fn columns(&self) -> &[StoreColumn] {
        &self.columns
    }

    /// Number of columns including the row number.
    pub fn column_count(&self) -> usize {
        self.columns.len() + 1
    }

    pub fn rows(&self) -> &[RowRecord] {
        &self.rows
    }

    pub fn get(&self, index: usize) -> Option<&RowRecord> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Append every row of `batch`, or none of them.
    pub fn append_batch(&mut self, batch: Vec<RowRecord>) -> Result<(), StoreError> {
        let expected = self.columns.len();
        if let Some((index, row)) = batch
            .iter()
            .enumerate()
            .find(|(_, row)| row.cells.len() != expected)
        {
            return Err(StoreError::WidthMismatch {
                index,
                expected,
                found: row.cells.len(),
            });
        }

        self.rows
            .try_reserve(batch.len())
            .map_err(|source| StoreError::OutOfMemory {
                rows: batch.len(),
                source,
            })?;
        self.rows.extend(batch);
        Ok(())
    }

    /// A store with the same columns holding `rows`.
    pub fn clone_with_rows(&self, rows: Vec<RowRecord>) -> RowStore {
        RowStore {
            columns: self.columns.clone(),
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use image::RgbaImage;

    use super::*;

    fn store(width: usize) -> RowStore {
        RowStore::new(
            (0..width)
                .map(|i| StoreColumn {
                    header: format!("c{i}"),
                    kind: ColumnKind::Text,
                })
                .collect(),
        )
    }

    #[test]
    fn batches_are_all_or_nothing() {
        let mut store = store(2);
        store
            .append_batch(vec![RowRecord::new(
                1,
                vec![CellValue::text("a"), CellValue::Empty],
            )])
            .unwrap();

        let err = store
            .append_batch(vec![
                RowRecord::new(2, vec![CellValue::text("b"), CellValue::Empty]),
                RowRecord::new(3, vec![CellValue::text("c")]),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::WidthMismatch {
                index: 1,
                expected: 2,
                found: 1
            }
        ));
        assert_eq!(store.len(), 1);
        assert_eq!(store.column_count(), 3);
        assert_eq!(store.rows()[0].column_count(), store.column_count());
    }

    #[test]
    fn reset_columns_drops_rows() {
        let mut store = store(1);
        store
            .append_batch(vec![RowRecord::new(1, vec![CellValue::text("a")])])
            .unwrap();
        store.reset_columns(Vec::new());
        assert!(store.is_empty());
        assert_eq!(store.column_count(), 1);
    }

    #[test]
    fn clone_with_rows_shares_images() {
        let image = DecodedImage::new(RgbaImage::new(2, 2));
        let row = RowRecord::new(
            1,
            vec![CellValue::ImagePair {
                image: Some(image.clone()),
                caption: "cap".to_string(),
            }],
        );
        let source = store(1);
        let snapshot = source.clone_with_rows(vec![row]);
        assert_eq!(snapshot.columns(), source.columns());
        assert!(snapshot.rows()[0].cells[0].image().unwrap().ptr_eq(&image));
    }

    #[test]
    fn emptiness_and_search_text() {
        assert!(CellValue::text("").is_empty());
        assert!(CellValue::ImagePair {
            image: None,
            caption: String::new()
        }
        .is_empty());
        assert!(!CellValue::ErrorMarker("x".into()).is_empty());
        assert_eq!(CellValue::Empty.search_text(), None);
        assert_eq!(
            CellValue::ImagePair {
                image: None,
                caption: "pic".into()
            }
            .search_text(),
            Some("pic")
        );
    }

    #[test]
    fn display_formats_picture_cells() {
        let cell = CellValue::ImagePair {
            image: Some(DecodedImage::new(RgbaImage::new(4, 3))),
            caption: "logo".into(),
        };
        assert_eq!(cell.to_string(), "[image 4x3] logo");
        assert_eq!(CellValue::ErrorMarker("bad".into()).to_string(), "#ERR(bad)");
    }
}
