#![forbid(unsafe_code)]
//! Pinning file cache for fixed-size (10 KiB) files.
//!
//! Callers pin the files they need in one atomic [`FileCache::pin_files`]
//! call, access them through [`PageRef`]/[`PageMut`] views, and release them
//! with [`FileCache::unpin_files`]. A background flusher writes dirty,
//! unpinned pages back once they have been dirty for `dirty_time`. When the
//! cache is full, admission evicts the least recently unpinned clean entry;
//! if none exists it blocks until an unpin or flush makes room.
//!
//! # Concurrency Model
//!
//! One [`parking_lot::Mutex`] guards the entry table and all entry metadata;
//! one [`parking_lot::Condvar`] signals every state change that could unblock
//! a pinner or the flusher. Backing-store I/O (load, store, unlink) always
//! runs with the mutex released. Page bytes sit behind a per-page
//! `RwLock`, which views hold; the pin is what keeps the page resident.

mod admission;
mod delete;
mod entry;
mod evict;
mod flusher;
mod view;

pub use view::{PageMut, PageRef};

use entry::{CacheState, SharedPage};
use flusher::FlushSelect;
use parking_lot::{Condvar, Mutex};
use pfc_error::{PfcError, Result};
use pfc_store::{DirStore, FileStore, PageStore};
use pfc_types::{CacheConfig, FileName};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, info};

/// Point-in-time snapshot of cache state and counters, captured under the
/// cache mutex. Counters are monotonic since construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub capacity: usize,
    /// Entries in the table, including loading placeholders.
    pub resident: usize,
    pub pinned: usize,
    pub dirty: usize,
    /// Pin requests for names already resident (counted once per distinct name).
    pub hits: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    /// Successful stores by the flusher, `flush_all`, or shutdown.
    pub flushes: u64,
    pub flush_failures: u64,
    /// Backing files unlinked or scheduled for unlink.
    pub deletes: u64,
    /// Times a pinner had to wait on the condvar.
    pub pin_waits: u64,
}

pub(crate) struct Shared<S: FileStore> {
    pub(crate) state: Mutex<CacheState>,
    pub(crate) cond: Condvar,
    pub(crate) store: PageStore<S>,
    pub(crate) config: CacheConfig,
}

impl<S: FileStore> Shared<S> {
    fn page_of(&self, name: &FileName) -> Result<SharedPage> {
        let state = self.state.lock();
        state
            .entries
            .get(name)
            .filter(|entry| entry.pin_count > 0)
            .and_then(|entry| entry.page().cloned())
            .ok_or_else(|| PfcError::NotPinned(name.as_str().to_owned()))
    }

    fn page_of_for_write(&self, name: &FileName) -> Result<SharedPage> {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .get_mut(name)
            .filter(|entry| entry.pin_count > 0)
            .ok_or_else(|| PfcError::NotPinned(name.as_str().to_owned()))?;
        let page = entry
            .page()
            .cloned()
            .ok_or_else(|| PfcError::NotPinned(name.as_str().to_owned()))?;
        entry.mark_dirty(Instant::now());
        Ok(page)
    }
}

/// Thread-safe pinning cache over a [`FileStore`].
///
/// Dropping the cache flushes every dirty entry and stops the flusher; use
/// [`FileCache::shutdown`] to observe writeback errors.
pub struct FileCache<S: FileStore + 'static = DirStore> {
    shared: Arc<Shared<S>>,
    flusher: Option<JoinHandle<()>>,
}

impl<S: FileStore + 'static> std::fmt::Debug for FileCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("config", &self.shared.config)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

impl FileCache<DirStore> {
    /// Cache over the directory `root`, created if missing.
    pub fn open_dir(root: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        Self::new(DirStore::open(root)?, config)
    }
}

impl<S: FileStore + 'static> FileCache<S> {
    /// Build a cache over `store` and start its flusher thread.
    pub fn new(store: S, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(CacheState::new(config.max_cache_entries)),
            cond: Condvar::new(),
            store: PageStore::new(store),
            config,
        });
        let flusher = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name("pfc-flusher".to_owned())
                .spawn(move || flusher::run(&shared))?
        };
        info!(
            target: "pfc::cache",
            max_cache_entries = config.max_cache_entries,
            dirty_time = ?config.dirty_time,
            "cache_started"
        );
        Ok(Self {
            shared,
            flusher: Some(flusher),
        })
    }

    /// Pin every name in `names`, all or nothing.
    ///
    /// A name listed twice is pinned twice and needs two unpins. Blocks while
    /// the cache cannot make room. The caller must not hold pins from an
    /// earlier call on this cache, or two callers can block each other.
    ///
    /// # Errors
    ///
    /// `InvalidName` or `CapacityExceeded` before any state change; a
    /// backing-store error if loading a missing page fails, in which case no
    /// pins from this call remain.
    pub fn pin_files<N: AsRef<str>>(&self, names: &[N]) -> Result<()> {
        let names = parse_names(names)?;
        self.shared.pin(&names)
    }

    /// Release one pin per occurrence in `names`.
    ///
    /// The last release of a delete-pending file unlinks it. Unpinning a file
    /// that is not pinned is a contract violation: it panics in debug builds
    /// and is logged and ignored otherwise.
    pub fn unpin_files<N: AsRef<str>>(&self, names: &[N]) {
        let mut parsed = Vec::with_capacity(names.len());
        for name in names {
            match FileName::new(name.as_ref()) {
                Ok(name) => parsed.push(name),
                Err(err) => {
                    error!(target: "pfc::admission", error = %err, "unpin_invalid_name");
                    if cfg!(debug_assertions) {
                        panic!("unpin of invalid name: {err}");
                    }
                }
            }
        }
        self.shared.unpin(&parsed);
    }

    /// Read-only view of a pinned file.
    ///
    /// Never waits while another view of the page is readable, even if a
    /// writer is queued behind it; it only waits out a live [`PageMut`].
    ///
    /// # Errors
    ///
    /// `NotPinned` when the caller holds no pin on `name`.
    pub fn file_data(&self, name: &str) -> Result<PageRef> {
        let name = FileName::new(name)?;
        let page = self.shared.page_of(&name)?;
        Ok(PageRef::new(page.read_arc_recursive()))
    }

    /// Writable view of a pinned file; marks the entry dirty.
    ///
    /// Waits until no other view of the page is alive.
    ///
    /// # Errors
    ///
    /// `NotPinned` when the caller holds no pin on `name`.
    pub fn mutable_file_data(&self, name: &str) -> Result<PageMut> {
        let name = FileName::new(name)?;
        let page = self.shared.page_of_for_write(&name)?;
        Ok(PageMut::new(page.write_arc()))
    }

    /// Delete `name` now if nobody holds it, otherwise once the last pin is
    /// released. Dirty data of a deleted file is discarded.
    ///
    /// # Errors
    ///
    /// The unlink error when an immediate delete fails. Deferred unlink
    /// failures are logged.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        let name = FileName::new(name)?;
        self.shared.delete(&name)
    }

    /// Synchronously write back every dirty, unpinned entry.
    pub fn flush_all(&self) -> Result<()> {
        let report = self.shared.flush_pass(FlushSelect::All);
        report.first_error.map_or(Ok(()), Err)
    }

    /// Stop the flusher, write back all dirty entries, and honor pending
    /// deletes.
    ///
    /// # Panics
    ///
    /// In debug builds, if any file is still pinned.
    pub fn shutdown(mut self) -> Result<()> {
        let pinned = self.shared.state.lock().pinned_count();
        debug_assert_eq!(pinned, 0, "cache shut down with {pinned} pinned files");
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        let Some(handle) = self.flusher.take() else {
            return Ok(());
        };
        debug!(target: "pfc::shutdown", "shutdown_start");
        self.shared.state.lock().stopping = true;
        self.shared.cond.notify_all();
        if handle.join().is_err() {
            error!(target: "pfc::shutdown", "flusher_panicked");
        }

        let pinned = self.shared.state.lock().pinned_count();
        if pinned > 0 {
            error!(target: "pfc::shutdown", pinned, "shutdown_pins_outstanding");
        }

        let report = self.shared.flush_pass(FlushSelect::All);
        let reaped = self.shared.reap_pending_deletes();
        info!(
            target: "pfc::shutdown",
            flushed = report.cleaned,
            failed = report.failed,
            "shutdown_complete"
        );
        match report.first_error {
            Some(err) => Err(err),
            None => reaped,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.config.max_cache_entries
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.shared.state.lock().entries.contains_key(name)
    }

    /// Current pin count of `name` (0 when not resident).
    #[must_use]
    pub fn pin_count(&self, name: &str) -> usize {
        self.shared
            .state
            .lock()
            .entries
            .get(name)
            .map_or(0, |entry| entry.pin_count)
    }

    #[must_use]
    pub fn is_dirty(&self, name: &str) -> bool {
        self.shared
            .state
            .lock()
            .entries
            .get(name)
            .is_some_and(|entry| entry.dirty)
    }

    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.shared.state.lock().dirty_count()
    }

    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        let state = self.shared.state.lock();
        let c = state.counters;
        CacheMetrics {
            capacity: state.capacity,
            resident: state.entries.len(),
            pinned: state.pinned_count(),
            dirty: state.dirty_count(),
            hits: c.hits,
            loads: c.loads,
            load_failures: c.load_failures,
            evictions: c.evictions,
            flushes: c.flushes,
            flush_failures: c.flush_failures,
            deletes: c.deletes,
            pin_waits: c.pin_waits,
        }
    }

    /// The underlying byte-file store.
    #[must_use]
    pub fn store(&self) -> &S {
        self.shared.store.inner()
    }
}

impl<S: FileStore + 'static> Drop for FileCache<S> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_inner() {
            error!(target: "pfc::shutdown", error = %err, "shutdown_flush_failed");
        }
    }
}

fn parse_names<N: AsRef<str>>(names: &[N]) -> Result<Vec<FileName>> {
    names
        .iter()
        .map(|name| FileName::new(name.as_ref()))
        .collect()
}
