//! Streams the rows of one worksheet into a [`RowStore`].
//!
//! A load runs through:
//!
//! 1. read the used range; a sheet without one fails with [`LoadError::MissingDimension`],
//! 2. index pictures (only when pictures are shown),
//! 3. derive the column headers and reset the store,
//! 4. read the data rows in batches, committing each batch to the store as a unit,
//! 5. filter the store with the session keyword.
//!
//! The cancel signal is checked before every cell. A canceled load keeps the batches committed
//! so far and skips the filter.

use std::collections::TryReserveError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sheetq_model::{DecodeError, DecodedImage, ImageSource, ScalarValue, SheetCell, SheetError};
use thiserror::Error;

use crate::batch::plan_batches;
use crate::cancel::Canceled;
use crate::columns::derive_columns;
use crate::config::EngineConfig;
use crate::events::{EventSink, LoadEvent};
use crate::image_cache::ImageCache;
use crate::memory::MemoryMonitor;
use crate::picture_index::{PictureIndex, PictureSlot};
use crate::row_store::{CellValue, RowRecord, StoreColumn, StoreError};
use crate::search;
use crate::session::LoadSession;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("worksheet has no used range")]
    MissingDimension,
    #[error("out of memory after {rows_committed} rows")]
    OutOfMemory { rows_committed: usize },
    #[error("no workbook is open")]
    NoWorkbook,
    #[error("worksheet error: {0}")]
    Worksheet(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<SheetError> for LoadError {
    fn from(err: SheetError) -> Self {
        LoadError::Worksheet(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Completed,
    Canceled,
    Failed(LoadError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    /// Rows committed to the store.
    pub rows_loaded: usize,
    pub status: LoadStatus,
    pub elapsed: Duration,
}

impl LoadResult {
    pub fn is_completed(&self) -> bool {
        self.status == LoadStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    Loading,
    Completed,
    Canceled,
    Failed,
}

impl LoaderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoaderState::Completed | LoaderState::Canceled | LoaderState::Failed
        )
    }
}

/// Why a load stopped early.
enum Interrupt {
    Canceled,
    Failed(LoadError),
}

impl From<Canceled> for Interrupt {
    fn from(_: Canceled) -> Self {
        Interrupt::Canceled
    }
}

impl From<LoadError> for Interrupt {
    fn from(err: LoadError) -> Self {
        Interrupt::Failed(err)
    }
}

fn out_of_memory(rows_committed: usize, err: &TryReserveError) -> Interrupt {
    log::warn!("allocation failed after {rows_committed} rows: {err}");
    Interrupt::Failed(LoadError::OutOfMemory { rows_committed })
}

/// Drives one load at a time through `Idle -> Loading -> Completed | Canceled | Failed`.
pub struct BatchLoader {
    config: EngineConfig,
    images: Arc<dyn ImageSource>,
    cache: Arc<ImageCache>,
    memory: MemoryMonitor,
    events: EventSink,
    state: LoaderState,
}

struct Progress {
    started: Instant,
    last_tick: Instant,
    total: usize,
}

impl BatchLoader {
    pub fn new(
        config: EngineConfig,
        images: Arc<dyn ImageSource>,
        cache: Arc<ImageCache>,
        memory: MemoryMonitor,
    ) -> Self {
        Self {
            config,
            images,
            cache,
            memory,
            events: EventSink::none(),
            state: LoaderState::Idle,
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Return a finished loader to `Idle`. Returns `false` while a load is in progress.
    pub fn reset(&mut self) -> bool {
        if self.state == LoaderState::Loading {
            return false;
        }
        self.state = LoaderState::Idle;
        true
    }

    /// Load `session` from scratch. A loader in a terminal state is reset first.
    pub fn load(&mut self, session: &mut LoadSession) -> LoadResult {
        if self.state.is_terminal() {
            self.reset();
        }
        self.state = LoaderState::Loading;
        let started = Instant::now();
        session.clear();
        self.events.emit(LoadEvent::Started {
            sheet: session.worksheet().name().to_string(),
        });

        let outcome = self.run(session, started);
        let rows_loaded = session.store.len();
        let elapsed = started.elapsed();
        let status = match outcome {
            Ok(()) => {
                log::info!(
                    "loaded {rows_loaded} rows from '{}' in {elapsed:?}",
                    session.worksheet().name()
                );
                // The terminal line counts the rows the caller will see.
                self.events.emit(LoadEvent::Completed {
                    records: session.view().len(),
                    elapsed,
                });
                self.state = LoaderState::Completed;
                LoadStatus::Completed
            }
            Err(Interrupt::Canceled) => {
                log::info!("load of '{}' canceled after {rows_loaded} rows", session.worksheet().name());
                self.events.emit(LoadEvent::Canceled {
                    rows_kept: rows_loaded,
                });
                self.state = LoaderState::Canceled;
                LoadStatus::Canceled
            }
            Err(Interrupt::Failed(err)) => {
                if let LoadError::OutOfMemory { .. } = err {
                    self.cache.purge();
                    self.events.emit(LoadEvent::OutOfMemory);
                } else {
                    self.events.emit(LoadEvent::Failed {
                        message: err.to_string(),
                    });
                }
                log::info!("load of '{}' failed: {err}", session.worksheet().name());
                self.state = LoaderState::Failed;
                LoadStatus::Failed(err)
            }
        };

        LoadResult {
            rows_loaded,
            status,
            elapsed,
        }
    }

    fn run(&self, session: &mut LoadSession, started: Instant) -> Result<(), Interrupt> {
        let ws = Arc::clone(session.worksheet());
        let cancel = session.cancel_signal().clone();
        let dim = ws.dimension().ok_or(LoadError::MissingDimension)?;

        if session.show_images() {
            session.pictures = Some(PictureIndex::build(ws.as_ref(), &cancel)?);
        }
        session.columns = derive_columns(ws.as_ref(), &dim, session.pictures.as_ref());
        let store_columns = session
            .columns
            .iter()
            .map(|meta| StoreColumn::from_meta(meta, session.show_images()))
            .collect();
        session.store.reset_columns(store_columns);

        let total = dim.data_rows() as usize;
        let mut progress = Progress {
            started,
            last_tick: started,
            total,
        };

        for batch in plan_batches(self.config.batch_size(), total) {
            cancel.check()?;
            let first_row = dim.first_data_row() + batch.start as u32;
            let last_row = dim.first_data_row() + (batch.end - 1) as u32;

            let rows = self.read_batch(session, first_row..=last_row, dim.start.col)?;
            let accepted = rows.len();
            match session.store.append_batch(rows) {
                Ok(()) => {}
                Err(StoreError::OutOfMemory { source, .. }) => {
                    return Err(out_of_memory(session.store.len(), &source));
                }
                Err(err @ StoreError::WidthMismatch { .. }) => {
                    return Err(LoadError::Unexpected(err.to_string()).into());
                }
            }
            log::debug!(
                "committed rows {first_row}..={last_row} ({accepted} kept, {} total)",
                session.store.len()
            );

            self.tick(&mut progress, batch.end, session)?;
        }

        cancel.check()?;
        let search_started = Instant::now();
        let snapshot = search::filter(&session.store, session.keyword());
        log::debug!(
            "filtered {} of {} rows in {:?}",
            snapshot.len(),
            session.store.len(),
            search_started.elapsed()
        );
        if !session.keyword().trim().is_empty() {
            self.events.emit(LoadEvent::SearchCompleted {
                records: snapshot.len(),
                elapsed: started.elapsed(),
            });
        }
        session.snapshot = Some(snapshot);
        Ok(())
    }

    fn tick(
        &self,
        progress: &mut Progress,
        loaded: usize,
        session: &LoadSession,
    ) -> Result<(), Interrupt> {
        let now = Instant::now();
        if now.duration_since(progress.last_tick) < self.config.progress_interval() {
            return Ok(());
        }
        progress.last_tick = now;
        self.events.emit(LoadEvent::Progress {
            loaded,
            total: progress.total,
            elapsed: now.duration_since(progress.started),
        });

        if let Some(sample) = self.memory.above_high_water() {
            log::warn!(
                "process memory at {} MiB, reclaiming image cache",
                sample.process_mib()
            );
            self.events.emit(LoadEvent::MemoryPressure {
                process_bytes: sample.process_bytes,
            });
            self.cache.sweep();
            session.cancel_signal().sleep(self.config.memory_backoff())?;
        }
        Ok(())
    }

    fn read_batch(
        &self,
        session: &LoadSession,
        rows: std::ops::RangeInclusive<u32>,
        first_col: u32,
    ) -> Result<Vec<RowRecord>, Interrupt> {
        let ws = session.worksheet();
        let cancel = session.cancel_signal();
        let keep_empty = !session.keyword().trim().is_empty();
        let first_data_row = *rows.start();
        let check_every = self.config.memory_check_every_rows();

        let capacity = rows.clone().count();
        let mut batch = Vec::new();
        batch
            .try_reserve(capacity)
            .map_err(|err| out_of_memory(session.store.len(), &err))?;

        for row in rows {
            if (row - first_data_row) % check_every == 0 {
                if let Some(sample) = self.memory.above_soft_limit() {
                    log::debug!(
                        "process memory at {} MiB on row {row}, sweeping image cache",
                        sample.process_mib()
                    );
                    self.cache.sweep();
                }
            }
            if ws.is_row_hidden(row) {
                continue;
            }

            let mut cells = Vec::new();
            cells
                .try_reserve(session.columns.len())
                .map_err(|err| out_of_memory(session.store.len(), &err))?;
            for (offset, meta) in session.columns.iter().enumerate() {
                cancel.check()?;
                let col = first_col + offset as u32;
                let value = match session.pictures.as_ref() {
                    Some(index) if meta.is_image && index.contains(row, col) => {
                        self.read_picture_cell(session, index, row, col)
                    }
                    _ => read_text_cell(ws.cell(row, col), row, col),
                };
                cells.push(value);
            }

            let record = RowRecord::new(row - 1, cells);
            if keep_empty || record.has_data() {
                batch.push(record);
            }
        }
        Ok(batch)
    }

    fn read_picture_cell(
        &self,
        session: &LoadSession,
        index: &PictureIndex,
        row: u32,
        col: u32,
    ) -> CellValue {
        let ws = session.worksheet();
        let caption = match ws.cell(row, col) {
            Ok(cell) => cell_text(&cell),
            Err(_) => String::new(),
        };

        match self.resolve_picture(session, index, row, col) {
            Ok(image) if image.is_valid() => CellValue::ImagePair {
                image: Some(image),
                caption,
            },
            Ok(_) | Err(DecodeError::NotAvailable) => CellValue::text(caption),
            Err(err) => {
                log::warn!("failed to decode picture at R{row}C{col}: {err}");
                CellValue::ErrorMarker(format!("image error: {err}"))
            }
        }
    }

    fn resolve_picture(
        &self,
        session: &LoadSession,
        index: &PictureIndex,
        row: u32,
        col: u32,
    ) -> Result<DecodedImage, DecodeError> {
        let key = index.key(row, col).cache_key();
        if let Some(image) = self.cache.try_get(&key) {
            return Ok(image);
        }

        let picture = match index.get(row, col) {
            Some(PictureSlot::Resolved(picture)) => picture.clone(),
            Some(PictureSlot::PresentUnresolved) | None => session
                .worksheet()
                .cell_picture(row, col)
                .ok_or(DecodeError::NotAvailable)?,
        };
        let image = self.images.decode(&picture)?;
        self.cache.add(key, image.clone());
        Ok(image)
    }
}

/// Text shown for a plain cell. Numbers use their raw value and `#VALUE!` is blanked.
fn cell_text(cell: &SheetCell) -> String {
    let text = match &cell.value {
        ScalarValue::Number(n) => n.to_string(),
        _ => cell.display_text(),
    };
    if text == "#VALUE!" {
        String::new()
    } else {
        text
    }
}

fn read_text_cell(cell: Result<SheetCell, SheetError>, row: u32, col: u32) -> CellValue {
    match cell {
        Ok(cell) => CellValue::text(cell_text(&cell)),
        Err(err) => {
            log::warn!("failed to read R{row}C{col}: {err}");
            CellValue::ErrorMarker(format!("cell error: {err}"))
        }
    }
}
