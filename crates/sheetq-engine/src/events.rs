use std::fmt;
use std::sync::mpsc::Sender;
use std::time::Duration;

/// Status updates emitted while a load runs. `Display` renders the user-facing status line.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadEvent {
    Started {
        sheet: String,
    },
    Progress {
        loaded: usize,
        total: usize,
        elapsed: Duration,
    },
    MemoryPressure {
        process_bytes: u64,
    },
    Completed {
        records: usize,
        elapsed: Duration,
    },
    SearchCompleted {
        records: usize,
        elapsed: Duration,
    },
    Canceled {
        rows_kept: usize,
    },
    OutOfMemory,
    Failed {
        message: String,
    },
}

impl LoadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoadEvent::Completed { .. }
                | LoadEvent::Canceled { .. }
                | LoadEvent::OutOfMemory
                | LoadEvent::Failed { .. }
        )
    }
}

impl fmt::Display for LoadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadEvent::Started { sheet } => write!(f, "Loading worksheet '{sheet}'..."),
            LoadEvent::Progress {
                loaded,
                total,
                elapsed,
            } => write!(
                f,
                "Loading: {loaded}/{total} rows ({:.1}s)",
                elapsed.as_secs_f64()
            ),
            LoadEvent::MemoryPressure { process_bytes } => write!(
                f,
                "Memory pressure: {} MiB in use, reclaiming image cache",
                process_bytes / (1024 * 1024)
            ),
            LoadEvent::Completed { records: 0, elapsed } => {
                write!(f, "Load complete - {:.3}s", elapsed.as_secs_f64())
            }
            LoadEvent::Completed { records, elapsed } => write!(
                f,
                "Load complete - {:.3}s, {records} records",
                elapsed.as_secs_f64()
            ),
            LoadEvent::SearchCompleted { records, elapsed } => write!(
                f,
                "Search complete - {records} records, query took {:.3}s",
                elapsed.as_secs_f64()
            ),
            LoadEvent::Canceled { rows_kept } => {
                write!(f, "Load canceled - {rows_kept} rows kept")
            }
            LoadEvent::OutOfMemory => f.write_str(
                "Out of memory, image cache cleared; some data may not be loaded",
            ),
            LoadEvent::Failed { message } => write!(f, "Load failed: {message}"),
        }
    }
}

/// Optional event channel. A dropped receiver is not an error.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    sender: Option<Sender<LoadEvent>>,
}

impl EventSink {
    pub fn new(sender: Sender<LoadEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: LoadEvent) {
        log::trace!("{event}");
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}
