use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lru::LruCache;
use sheetq_model::DecodedImage;

use crate::config::EngineConfig;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImageCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// Entries removed by a sweep.
    pub evicted: u64,
    /// Images released by the cache for any reason (eviction, replacement, purge, teardown).
    pub disposed: u64,
    pub sweeps: u64,
}

struct Entry {
    image: DecodedImage,
    last_access: Instant,
}

struct Inner {
    entries: LruCache<String, Entry>,
    stats: ImageCacheStats,
    disposed: bool,
}

impl Inner {
    /// Drop least-recently-used entries until at most `capacity` remain.
    fn sweep_locked(&mut self, capacity: usize) -> usize {
        let mut removed = 0usize;
        while self.entries.len() > capacity {
            let Some((_key, entry)) = self.entries.pop_lru() else {
                break;
            };
            drop(entry);
            removed += 1;
        }
        self.stats.sweeps = self.stats.sweeps.saturating_add(1);
        self.stats.evicted = self.stats.evicted.saturating_add(removed as u64);
        self.stats.disposed = self.stats.disposed.saturating_add(removed as u64);
        removed
    }

    fn clear_locked(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.stats.disposed = self.stats.disposed.saturating_add(removed as u64);
        removed
    }
}

struct Sweeper {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Bounded store of decoded pictures keyed by cell (`"{sheet}_{row}_{col}"`).
///
/// Entries are ordered by last access. Inserting past 1.2x capacity trims the cache back to
/// capacity right away; an optional background thread trims it on a fixed period as well. Every
/// operation runs under a single lock, so the cache can be shared freely between the loader
/// thread and the caller.
///
/// After [`ImageCache::dispose`] the cache is inert: lookups miss and inserted images are released
/// immediately.
pub struct ImageCache {
    capacity: usize,
    inner: Arc<Mutex<Inner>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl ImageCache {
    /// A cache without a periodic sweep.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Arc::new(Mutex::new(Inner {
                entries: LruCache::unbounded(),
                stats: ImageCacheStats::default(),
                disposed: false,
            })),
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_periodic_sweep(capacity: usize, interval: Duration) -> Self {
        let cache = Self::new(capacity);
        let weak = Arc::downgrade(&cache.inner);
        let (stop, stop_rx) = mpsc::channel::<()>();
        let spawned = std::thread::Builder::new()
            .name("sheetq-cache-sweep".to_string())
            .spawn(move || run_sweeper(weak, capacity, interval, stop_rx));
        match spawned {
            Ok(handle) => {
                *lock_ignoring_poison(&cache.sweeper) = Some(Sweeper { stop, handle });
            }
            Err(err) => {
                log::warn!("failed to start image cache sweeper: {err}");
            }
        }
        cache
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        match config.image_cache_sweep_interval() {
            Some(interval) => Self::with_periodic_sweep(config.image_cache_capacity, interval),
            None => Self::new(config.image_cache_capacity),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_ignoring_poison(&self.inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn stats(&self) -> ImageCacheStats {
        self.lock().stats
    }

    /// Whether `key` is cached, without counting as an access.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains(key)
    }

    /// Last access time of `key`, without counting as an access.
    pub fn last_access(&self, key: &str) -> Option<Instant> {
        self.lock().entries.peek(key).map(|entry| entry.last_access)
    }

    /// Look up `key`, marking it most recently used on a hit.
    pub fn try_get(&self, key: &str) -> Option<DecodedImage> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.disposed {
            return None;
        }
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = Instant::now();
                inner.stats.hits = inner.stats.hits.saturating_add(1);
                Some(entry.image.clone())
            }
            None => {
                inner.stats.misses = inner.stats.misses.saturating_add(1);
                None
            }
        }
    }

    /// Insert or replace `key`. A replaced image is released immediately.
    pub fn add(&self, key: impl Into<String>, image: DecodedImage) {
        let mut inner = self.lock();
        if inner.disposed {
            inner.stats.disposed = inner.stats.disposed.saturating_add(1);
            return;
        }

        let entry = Entry {
            image,
            last_access: Instant::now(),
        };
        if let Some(replaced) = inner.entries.put(key.into(), entry) {
            drop(replaced);
            inner.stats.disposed = inner.stats.disposed.saturating_add(1);
        }
        inner.stats.inserts = inner.stats.inserts.saturating_add(1);

        let len = inner.entries.len();
        if self.capacity > 0 && len.saturating_mul(5) > self.capacity.saturating_mul(6) {
            let removed = inner.sweep_locked(self.capacity);
            log::debug!("image cache over capacity, evicted {removed} entries");
        }
    }

    /// Trim to capacity, evicting least-recently-used entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut inner = self.lock();
        if inner.disposed {
            return 0;
        }
        inner.sweep_locked(self.capacity)
    }

    /// Release every cached image but keep the cache usable.
    pub fn purge(&self) -> usize {
        let removed = self.lock().clear_locked();
        if removed > 0 {
            log::info!("image cache purged, released {removed} images");
        }
        removed
    }

    /// Stop the periodic sweep and release every cached image. Safe to call more than once.
    pub fn dispose(&self) {
        let sweeper = lock_ignoring_poison(&self.sweeper).take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.stop.send(());
            if sweeper.handle.join().is_err() {
                log::warn!("image cache sweeper panicked");
            }
        }

        let mut inner = self.lock();
        if inner.disposed {
            return;
        }
        inner.disposed = true;
        inner.clear_locked();
    }
}

impl Drop for ImageCache {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ImageCache")
            .field("capacity", &self.capacity)
            .field("len", &inner.entries.len())
            .field("disposed", &inner.disposed)
            .field("stats", &inner.stats)
            .finish()
    }
}

fn run_sweeper(
    inner: Weak<Mutex<Inner>>,
    capacity: usize,
    interval: Duration,
    stop: mpsc::Receiver<()>,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let mut guard = lock_ignoring_poison(&inner);
                if guard.disposed {
                    return;
                }
                let removed = guard.sweep_locked(capacity);
                if removed > 0 {
                    log::debug!("periodic image cache sweep evicted {removed} entries");
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
