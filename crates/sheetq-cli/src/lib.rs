//! Command-line driver for sheetq.
//!
//! `sheetq sheets <FILE>` lists worksheets; `sheetq query <FILE>` loads one sheet through the
//! streaming engine, prints status lines to stderr and the matching rows to stdout.

pub mod cli;
pub mod render;
