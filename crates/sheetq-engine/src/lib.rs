//! Streaming load and search for large worksheets.
//!
//! [`LoadController`] runs a [`BatchLoader`] on a background thread. The loader indexes the
//! sheet's pictures, reads rows in batches into a [`RowStore`] (decoding pictures through a
//! shared [`ImageCache`]), backs off under memory pressure, and finally filters the rows with
//! the [`search`] query language. Progress and status lines arrive as [`LoadEvent`]s.

pub mod batch;
mod cancel;
mod columns;
mod config;
mod decode;
mod events;
mod image_cache;
mod loader;
mod memory;
mod picture_index;
mod row_store;
pub mod search;
mod session;

pub use cancel::{CancelSignal, Canceled};
pub use columns::{derive_columns, placeholder_header, ColumnMeta};
pub use config::{ConfigError, EngineConfig};
pub use decode::RasterImageSource;
pub use events::{EventSink, LoadEvent};
pub use image_cache::{ImageCache, ImageCacheStats};
pub use loader::{BatchLoader, LoadError, LoadResult, LoadStatus, LoaderState};
pub use memory::{MemoryMonitor, MemoryProbe, MemorySample, SystemMemoryProbe};
pub use picture_index::{PictureIndex, PictureKey, PictureSlot};
pub use row_store::{
    CellValue, ColumnKind, RowRecord, RowStore, StoreColumn, StoreError, ROW_NUMBER_HEADER,
};
pub use search::{normalize_query, SearchCondition};
pub use session::{LoadController, LoadHandle, LoadOutcome, LoadSession};
