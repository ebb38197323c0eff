//! Read-only XLSX backend for sheetq.
//!
//! [`XlsxWorkbook`] inflates a package into memory (bounded by [`XlsxLimits`]) and hands out
//! [`XlsxWorksheet`]s implementing [`sheetq_model::Worksheet`]: cell values, hidden rows, the
//! used range, drawing-layer pictures, and rich value ("Place in Cell") pictures.

mod drawings;
mod package;
mod relationships;
mod rich_data;
mod shared_strings;
mod workbook;
mod worksheet;

pub use package::{XlsxError, XlsxLimits, XlsxPackage, MAX_PART_BYTES, MAX_TOTAL_BYTES};
pub use relationships::{rels_for_part, resolve_target, Relationship, Relationships};
pub use shared_strings::SharedStrings;
pub use workbook::XlsxWorkbook;
pub use worksheet::XlsxWorksheet;
