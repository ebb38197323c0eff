//! `sheetq-model` is the boundary between the sheetq engine and whatever parses spreadsheet
//! files.
//!
//! A backend exposes:
//! - worksheet enumeration ([`WorkbookSource`]),
//! - the used rectangle, cell values, and hidden rows of one sheet ([`Worksheet`]),
//! - pictures, both anchored on the drawing layer and placed inside cells ([`PictureRef`]).
//!
//! The engine never owns file handles; it only holds `Arc<dyn Worksheet>` for the duration of a
//! load.

mod address;
mod memory_sheet;
mod picture;
mod sheet;
mod value;

pub use address::{column_letters, parse_a1_area, A1ParseError, CellRef, MAX_COLS, MAX_ROWS};
pub use memory_sheet::{InMemoryWorkbook, InMemoryWorksheet};
pub use picture::{AnchoredPicture, DecodeError, DecodedImage, ImageSource, PictureRef};
pub use sheet::{SheetDimension, SheetError, Worksheet, WorkbookSource};
pub use value::{ScalarValue, SheetCell};
