use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use sheetq_model::{ImageSource, WorkbookSource, Worksheet};

use crate::cancel::CancelSignal;
use crate::columns::ColumnMeta;
use crate::config::EngineConfig;
use crate::decode::RasterImageSource;
use crate::events::{EventSink, LoadEvent};
use crate::image_cache::ImageCache;
use crate::loader::{BatchLoader, LoadError, LoadResult, LoadStatus};
use crate::memory::{MemoryMonitor, MemoryProbe, SystemMemoryProbe};
use crate::picture_index::PictureIndex;
use crate::row_store::RowStore;

/// Everything one load of one worksheet owns: its picture index, columns, rows, filtered
/// snapshot, and cancel signal.
pub struct LoadSession {
    worksheet: Arc<dyn Worksheet>,
    keyword: String,
    show_images: bool,
    cancel: CancelSignal,
    pub(crate) pictures: Option<PictureIndex>,
    pub(crate) columns: Vec<ColumnMeta>,
    pub(crate) store: RowStore,
    pub(crate) snapshot: Option<RowStore>,
}

impl LoadSession {
    pub fn new(worksheet: Arc<dyn Worksheet>, keyword: impl Into<String>, show_images: bool) -> Self {
        Self::with_cancel(worksheet, keyword, show_images, CancelSignal::new())
    }

    /// A session observing a caller-provided signal.
    pub fn with_cancel(
        worksheet: Arc<dyn Worksheet>,
        keyword: impl Into<String>,
        show_images: bool,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            worksheet,
            keyword: keyword.into(),
            show_images,
            cancel,
            pictures: None,
            columns: Vec::new(),
            store: RowStore::default(),
            snapshot: None,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.pictures = None;
        self.columns.clear();
        self.store = RowStore::default();
        self.snapshot = None;
    }

    pub fn worksheet(&self) -> &Arc<dyn Worksheet> {
        &self.worksheet
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn show_images(&self) -> bool {
        self.show_images
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn picture_index(&self) -> Option<&PictureIndex> {
        self.pictures.as_ref()
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Every committed row, in sheet order.
    pub fn store(&self) -> &RowStore {
        &self.store
    }

    /// Rows matching the keyword, renumbered from 1. `None` until a load completes.
    pub fn snapshot(&self) -> Option<&RowStore> {
        self.snapshot.as_ref()
    }

    /// The snapshot when there is one, else the committed rows.
    pub fn view(&self) -> &RowStore {
        self.snapshot.as_ref().unwrap_or(&self.store)
    }
}

impl std::fmt::Debug for LoadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadSession")
            .field("sheet", &self.worksheet.name())
            .field("keyword", &self.keyword)
            .field("show_images", &self.show_images)
            .field("rows", &self.store.len())
            .field("snapshot", &self.snapshot.as_ref().map(RowStore::len))
            .finish()
    }
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub result: LoadResult,
    pub session: LoadSession,
}

enum HandleState {
    Running(JoinHandle<LoadOutcome>),
    Done(Box<LoadOutcome>),
}

/// A load running on a background thread.
pub struct LoadHandle {
    cancel: CancelSignal,
    worksheet: Arc<dyn Worksheet>,
    keyword: String,
    show_images: bool,
    state: HandleState,
}

impl LoadHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Running(handle) => handle.is_finished(),
            HandleState::Done(_) => true,
        }
    }

    /// Wait for the load. A panic on the load thread is reported as a failed load with an empty
    /// session.
    pub fn join(self) -> LoadOutcome {
        match self.state {
            HandleState::Done(outcome) => *outcome,
            HandleState::Running(handle) => match handle.join() {
                Ok(outcome) => outcome,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "load thread panicked".to_string());
                    log::warn!("load thread panicked: {message}");
                    LoadOutcome {
                        result: LoadResult {
                            rows_loaded: 0,
                            status: LoadStatus::Failed(LoadError::Unexpected(message)),
                            elapsed: Default::default(),
                        },
                        session: LoadSession::new(self.worksheet, self.keyword, self.show_images),
                    }
                }
            },
        }
    }
}

/// The worksheets whose pictures may share the image cache.
///
/// Cache keys only name a sheet and a cell, so two workbooks with a `Sheet1` would collide.
/// A file session ends when another workbook is opened or a worksheet from outside the
/// session is loaded; the cache is replaced at that point.
#[derive(Default)]
struct FileSession {
    workbook: Option<Arc<dyn WorkbookSource>>,
    sheets: HashMap<String, Arc<dyn Worksheet>>,
    members: Vec<Weak<dyn Worksheet>>,
}

impl FileSession {
    fn contains(&self, worksheet: &Arc<dyn Worksheet>) -> bool {
        let candidate = Arc::downgrade(worksheet);
        self.members.iter().any(|member| Weak::ptr_eq(member, &candidate))
    }

    fn admit(&mut self, worksheet: &Arc<dyn Worksheet>) {
        if !self.contains(worksheet) {
            self.members.push(Arc::downgrade(worksheet));
        }
    }
}

/// Runs at most one load at a time and owns the image cache shared between loads of one file
/// session.
///
/// Starting a load cancels the one before it without waiting for it.
pub struct LoadController {
    config: EngineConfig,
    images: Arc<dyn ImageSource>,
    probe: Arc<dyn MemoryProbe>,
    cache: Arc<ImageCache>,
    events: EventSink,
    show_images: bool,
    active: Option<CancelSignal>,
    file: FileSession,
}

impl LoadController {
    pub fn new(config: EngineConfig) -> Self {
        let images = Arc::new(RasterImageSource::from_config(&config));
        Self::with_parts(config, images, Arc::new(SystemMemoryProbe::new()))
    }

    pub fn with_parts(
        config: EngineConfig,
        images: Arc<dyn ImageSource>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let cache = Arc::new(ImageCache::from_config(&config));
        Self {
            show_images: config.show_images,
            config,
            images,
            probe,
            cache,
            events: EventSink::none(),
            active: None,
            file: FileSession::default(),
        }
    }

    pub fn set_event_sender(&mut self, sender: Sender<LoadEvent>) {
        self.events = EventSink::new(sender);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn image_cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    pub fn show_images(&self) -> bool {
        self.show_images
    }

    /// Turn picture loading on or off. The image cache is rebuilt on every change; the caller
    /// is expected to reload. Returns whether the setting changed.
    pub fn set_show_images(&mut self, show: bool) -> bool {
        if self.show_images == show {
            return false;
        }
        self.cancel_active();
        self.show_images = show;
        self.replace_cache();
        true
    }

    /// Swap in an empty cache. A canceled load still holds the old one, so whatever it decodes
    /// while winding down lands in a disposed cache.
    fn replace_cache(&mut self) {
        self.cache.dispose();
        self.cache = Arc::new(ImageCache::from_config(&self.config));
    }

    pub fn cancel_active(&mut self) {
        if let Some(cancel) = self.active.take() {
            cancel.cancel();
        }
    }

    /// Start a new file session on `workbook`. The active load is canceled and cached pictures
    /// from the previous session are dropped.
    pub fn open_workbook(&mut self, workbook: Arc<dyn WorkbookSource>) {
        self.cancel_active();
        self.replace_cache();
        self.file = FileSession {
            workbook: Some(workbook),
            ..FileSession::default()
        };
        log::debug!("opened a new file session; image cache replaced");
    }

    /// Load `worksheet` on a background thread, filtering with `keyword` once complete.
    ///
    /// A worksheet that does not belong to the current file session starts a new one.
    pub fn start_load(&mut self, worksheet: Arc<dyn Worksheet>, keyword: &str) -> LoadHandle {
        if !self.file.contains(&worksheet) {
            self.cancel_active();
            self.replace_cache();
            self.file = FileSession::default();
            self.file.admit(&worksheet);
            log::debug!(
                "'{}' starts a new file session; image cache replaced",
                worksheet.name()
            );
        }
        self.launch(worksheet, keyword)
    }

    fn launch(&mut self, worksheet: Arc<dyn Worksheet>, keyword: &str) -> LoadHandle {
        self.cancel_active();

        let mut session = LoadSession::new(Arc::clone(&worksheet), keyword, self.show_images);
        let cancel = session.cancel_signal().clone();
        self.active = Some(cancel.clone());

        let mut loader = BatchLoader::new(
            self.config.clone(),
            Arc::clone(&self.images),
            Arc::clone(&self.cache),
            MemoryMonitor::new(Arc::clone(&self.probe), &self.config),
        )
        .with_events(self.events.clone());

        let spawned = std::thread::Builder::new()
            .name(format!("sheetq-load-{}", worksheet.name()))
            .spawn(move || {
                let result = loader.load(&mut session);
                LoadOutcome { result, session }
            });

        let state = match spawned {
            Ok(handle) => HandleState::Running(handle),
            Err(err) => {
                let message = format!("failed to start load thread: {err}");
                self.events.emit(LoadEvent::Failed {
                    message: message.clone(),
                });
                HandleState::Done(Box::new(LoadOutcome {
                    result: LoadResult {
                        rows_loaded: 0,
                        status: LoadStatus::Failed(LoadError::Unexpected(message)),
                        elapsed: Default::default(),
                    },
                    session: LoadSession::new(Arc::clone(&worksheet), keyword, self.show_images),
                }))
            }
        };

        LoadHandle {
            cancel,
            worksheet,
            keyword: keyword.to_string(),
            show_images: self.show_images,
            state,
        }
    }

    /// Search re-runs the load with `query` as the keyword.
    pub fn search(&mut self, worksheet: Arc<dyn Worksheet>, query: &str) -> LoadHandle {
        self.start_load(worksheet, query)
    }

    /// Look up `sheet` in the open workbook and start loading it. Reloading a sheet reuses the
    /// worksheet opened the first time, so its decoded pictures stay cached.
    pub fn start_sheet(&mut self, sheet: &str, keyword: &str) -> Result<LoadHandle, LoadError> {
        let worksheet = match self.file.sheets.get(sheet) {
            Some(worksheet) => Arc::clone(worksheet),
            None => {
                let workbook = self.file.workbook.as_ref().ok_or(LoadError::NoWorkbook)?;
                let worksheet = workbook.worksheet(sheet)?;
                self.file
                    .sheets
                    .insert(sheet.to_string(), Arc::clone(&worksheet));
                worksheet
            }
        };
        self.file.admit(&worksheet);
        Ok(self.launch(worksheet, keyword))
    }
}

impl Drop for LoadController {
    fn drop(&mut self) {
        self.cancel_active();
    }
}

#[cfg(test)]
mod tests {
    use image::RgbaImage;
    use sheetq_model::{DecodedImage, InMemoryWorkbook, InMemoryWorksheet};

    use super::*;
    use crate::memory::MemorySample;

    struct NoPressure;

    impl MemoryProbe for NoPressure {
        fn sample(&self) -> Option<MemorySample> {
            None
        }
    }

    fn controller() -> LoadController {
        let config = EngineConfig {
            image_cache_sweep_secs: 0,
            ..EngineConfig::default()
        };
        LoadController::with_parts(
            config,
            Arc::new(RasterImageSource::default()),
            Arc::new(NoPressure),
        )
    }

    #[test]
    fn view_falls_back_to_the_store() {
        let ws: Arc<dyn Worksheet> = Arc::new(InMemoryWorksheet::new("S"));
        let session = LoadSession::new(ws, "", true);
        assert!(session.snapshot().is_none());
        assert!(session.view().is_empty());
    }

    #[test]
    fn toggling_images_rebuilds_the_cache() {
        let mut controller = controller();
        let before = Arc::clone(controller.image_cache());
        assert!(!controller.set_show_images(true));
        assert!(controller.set_show_images(false));
        assert!(before.is_disposed());
        assert!(!controller.image_cache().is_disposed());
        assert!(!controller.show_images());
    }

    #[test]
    fn unknown_sheet_is_a_worksheet_error() {
        let mut controller = controller();
        assert_eq!(
            controller.start_sheet("Missing", "").err(),
            Some(LoadError::NoWorkbook)
        );
        controller.open_workbook(Arc::new(InMemoryWorkbook::new()));
        let err = controller.start_sheet("Missing", "").err();
        assert_eq!(
            err,
            Some(LoadError::Worksheet("worksheet not found: Missing".to_string()))
        );
    }

    #[test]
    fn a_worksheet_outside_the_file_session_gets_a_fresh_cache() {
        let mut controller = controller();
        let mut sheet = InMemoryWorksheet::new("S");
        sheet.set_row(1, &["a"]).set_row(2, &["x"]);
        let ws: Arc<dyn Worksheet> = Arc::new(sheet);
        controller.start_load(Arc::clone(&ws), "").join();

        controller
            .image_cache()
            .add("S_2_1", DecodedImage::new(RgbaImage::new(2, 2)));
        controller.start_load(Arc::clone(&ws), "").join();
        assert!(controller.image_cache().contains("S_2_1"));

        let before = Arc::clone(controller.image_cache());
        let mut other = InMemoryWorksheet::new("S");
        other.set_row(1, &["a"]).set_row(2, &["y"]);
        controller.start_load(Arc::new(other), "").join();
        assert!(before.is_disposed());
        assert!(controller.image_cache().is_empty());
    }

    #[test]
    fn starting_a_load_cancels_the_previous_one() {
        let mut controller = controller();
        let mut sheet = InMemoryWorksheet::new("S");
        sheet.set_row(1, &["a"]).set_row(2, &["x"]);
        let ws: Arc<dyn Worksheet> = Arc::new(sheet);

        let first = controller.start_load(Arc::clone(&ws), "");
        let second = controller.start_load(ws, "");
        assert!(first.cancel_signal().is_canceled());
        assert!(!second.cancel_signal().is_canceled());

        let outcome = second.join();
        assert!(outcome.result.is_completed());
        assert_eq!(outcome.session.view().len(), 1);
        first.join();
    }
}
