use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sheetq_model::{SheetDimension, Worksheet};

use crate::picture_index::PictureIndex;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub header: String,
    pub is_image: bool,
}

/// Header for a blank header cell.
pub fn placeholder_header(col: u32) -> String {
    format!("<Column {col}>")
}

/// Column headers from the first row of `dim`, made unique by suffixing repeats with `_2`,
/// `_3`, ...
///
/// A column is image-bearing when `pictures` has an entry in it below the header row.
pub fn derive_columns(
    ws: &dyn Worksheet,
    dim: &SheetDimension,
    pictures: Option<&PictureIndex>,
) -> Vec<ColumnMeta> {
    let mut seen: HashMap<String, u32> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut columns = Vec::with_capacity(dim.columns() as usize);

    for col in dim.start.col..=dim.end.col {
        let text = match ws.cell(dim.header_row(), col) {
            Ok(cell) => cell.display_text(),
            Err(err) => {
                log::warn!("failed to read header R{}C{col}: {err}", dim.header_row());
                String::new()
            }
        };
        let original = if text.trim().is_empty() {
            placeholder_header(col)
        } else {
            text
        };

        let count = seen.entry(original.clone()).or_insert(0);
        *count += 1;
        let mut header = if *count > 1 {
            format!("{original}_{count}")
        } else {
            original.clone()
        };
        while taken.contains(&header) {
            *count += 1;
            header = format!("{original}_{count}");
        }
        taken.insert(header.clone());

        columns.push(ColumnMeta {
            header,
            is_image: pictures.is_some_and(|index| index.is_image_column(col)),
        });
    }
    columns
}
