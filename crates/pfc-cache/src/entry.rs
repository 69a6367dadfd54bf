//! Entry table: the state guarded by the cache-wide mutex.

use parking_lot::RwLock;
use pfc_store::Page;
use pfc_types::FileName;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

/// Page shared between the table and outstanding views.
pub(crate) type SharedPage = Arc<RwLock<Page>>;

#[derive(Debug)]
pub(crate) enum EntryState {
    /// Placeholder reserved by a pinner whose load is running outside the lock.
    Loading,
    Ready(SharedPage),
}

#[derive(Debug)]
pub(crate) struct CacheEntry {
    pub(crate) state: EntryState,
    pub(crate) pin_count: usize,
    pub(crate) dirty: bool,
    /// Set when `dirty` last went false -> true.
    pub(crate) dirty_since: Option<Instant>,
    /// Bumped on every mutable access; lets the flusher detect re-dirtying.
    pub(crate) dirty_epoch: u64,
    pub(crate) delete_pending: bool,
    /// Flusher-owned pin: blocks eviction and reaping, not readers.
    pub(crate) flushing: bool,
    pub(crate) last_unpin: Instant,
    /// Logical clock stamp for `last_unpin`, breaks timestamp ties.
    pub(crate) unpin_seq: u64,
}

impl CacheEntry {
    pub(crate) fn loading(pins: usize) -> Self {
        Self {
            state: EntryState::Loading,
            pin_count: pins,
            dirty: false,
            dirty_since: None,
            dirty_epoch: 0,
            delete_pending: false,
            flushing: false,
            last_unpin: Instant::now(),
            unpin_seq: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn ready(page: Page) -> Self {
        let mut entry = Self::loading(0);
        entry.state = EntryState::Ready(Arc::new(RwLock::new(page)));
        entry
    }

    pub(crate) fn is_loading(&self) -> bool {
        matches!(self.state, EntryState::Loading)
    }

    pub(crate) fn page(&self) -> Option<&SharedPage> {
        match &self.state {
            EntryState::Ready(page) => Some(page),
            EntryState::Loading => None,
        }
    }

    /// Held by a caller pin or by the flusher.
    pub(crate) fn is_held(&self) -> bool {
        self.pin_count > 0 || self.flushing
    }

    pub(crate) fn is_evictable(&self) -> bool {
        !self.is_held() && !self.dirty && !self.delete_pending && !self.is_loading()
    }

    /// Dirty, unreferenced, and not about to be deleted.
    pub(crate) fn is_flushable(&self) -> bool {
        self.dirty && !self.is_held() && !self.delete_pending && !self.is_loading()
    }

    pub(crate) fn flush_due_at(&self, dirty_time: Duration) -> Option<Instant> {
        if !self.is_flushable() {
            return None;
        }
        self.dirty_since.map(|since| since + dirty_time)
    }

    pub(crate) fn mark_dirty(&mut self, now: Instant) {
        if !self.dirty {
            self.dirty = true;
            self.dirty_since = Some(now);
        }
        self.dirty_epoch = self.dirty_epoch.wrapping_add(1);
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
        self.dirty_since = None;
    }
}

/// Monotonic counters reported through [`crate::CacheMetrics`].
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Counters {
    pub(crate) hits: u64,
    pub(crate) loads: u64,
    pub(crate) load_failures: u64,
    pub(crate) evictions: u64,
    pub(crate) flushes: u64,
    pub(crate) flush_failures: u64,
    pub(crate) deletes: u64,
    pub(crate) pin_waits: u64,
}

#[derive(Debug)]
pub(crate) struct CacheState {
    pub(crate) entries: HashMap<FileName, CacheEntry>,
    /// Names whose backing file is being unlinked outside the lock.
    pub(crate) unlinking: HashSet<FileName>,
    pub(crate) capacity: usize,
    pub(crate) unpin_clock: u64,
    pub(crate) stopping: bool,
    pub(crate) counters: Counters,
}

impl CacheState {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            unlinking: HashSet::new(),
            capacity,
            unpin_clock: 0,
            stopping: false,
            counters: Counters::default(),
        }
    }

    pub(crate) fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.entries.len())
    }

    /// Drop `count` pins on `name`.
    ///
    /// Returns the name when the release completed a pending delete; the
    /// caller must then unlink it with the lock released.
    pub(crate) fn release_pins(&mut self, name: &FileName, count: usize) -> Option<FileName> {
        let Some(entry) = self.entries.get_mut(name) else {
            error!(target: "pfc::admission", name = %name, "unpin_unknown_file");
            if cfg!(debug_assertions) && !std::thread::panicking() {
                panic!("unpin of {name:?}, which has no cache entry");
            }
            return None;
        };
        if entry.pin_count < count {
            error!(
                target: "pfc::admission",
                name = %name,
                pins = entry.pin_count,
                released = count,
                "unpin_below_zero"
            );
            if cfg!(debug_assertions) && !std::thread::panicking() {
                panic!("unpin of {name:?} exceeds its {} pins", entry.pin_count);
            }
        }
        entry.pin_count = entry.pin_count.saturating_sub(count);
        if entry.pin_count > 0 {
            return None;
        }

        self.unpin_clock += 1;
        entry.last_unpin = Instant::now();
        entry.unpin_seq = self.unpin_clock;
        if entry.delete_pending && !entry.flushing {
            return Some(self.begin_unlink(name));
        }
        None
    }

    /// Remove the entry (discarding any dirty data) and mark the name as
    /// being unlinked.
    pub(crate) fn begin_unlink(&mut self, name: &FileName) -> FileName {
        let _ = self.entries.remove(name);
        self.unlinking.insert(name.clone());
        self.counters.deletes += 1;
        name.clone()
    }

    pub(crate) fn next_flush_due(&self, dirty_time: Duration) -> Option<Instant> {
        self.entries
            .values()
            .filter_map(|entry| entry.flush_due_at(dirty_time))
            .min()
    }

    pub(crate) fn pinned_count(&self) -> usize {
        self.entries.values().filter(|e| e.pin_count > 0).count()
    }

    pub(crate) fn dirty_count(&self) -> usize {
        self.entries.values().filter(|e| e.dirty).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> FileName {
        FileName::new(s).expect("name")
    }

    #[test]
    fn mark_dirty_keeps_first_timestamp() {
        let mut entry = CacheEntry::ready(Page::zeroed());
        let t0 = Instant::now();
        entry.mark_dirty(t0);
        entry.mark_dirty(t0 + Duration::from_secs(5));
        assert_eq!(entry.dirty_since, Some(t0));
        assert_eq!(entry.dirty_epoch, 2);

        entry.mark_clean();
        assert!(!entry.dirty);
        assert_eq!(entry.dirty_since, None);
    }

    #[test]
    fn release_to_zero_stamps_lru_clock() {
        let mut state = CacheState::new(4);
        let mut entry = CacheEntry::ready(Page::zeroed());
        entry.pin_count = 2;
        state.entries.insert(name("a"), entry);

        assert_eq!(state.release_pins(&name("a"), 1), None);
        assert_eq!(state.entries[&name("a")].unpin_seq, 0);
        assert_eq!(state.release_pins(&name("a"), 1), None);
        assert_eq!(state.entries[&name("a")].unpin_seq, 1);
        assert!(state.entries[&name("a")].is_evictable());
    }

    #[test]
    fn release_reaps_pending_delete() {
        let mut state = CacheState::new(4);
        let mut entry = CacheEntry::ready(Page::zeroed());
        entry.pin_count = 1;
        entry.delete_pending = true;
        entry.mark_dirty(Instant::now());
        state.entries.insert(name("d"), entry);

        assert_eq!(state.release_pins(&name("d"), 1), Some(name("d")));
        assert!(state.entries.is_empty());
        assert!(state.unlinking.contains("d"));
        assert_eq!(state.counters.deletes, 1);
    }

    #[test]
    fn flushing_entry_defers_reap() {
        let mut state = CacheState::new(4);
        let mut entry = CacheEntry::ready(Page::zeroed());
        entry.pin_count = 1;
        entry.delete_pending = true;
        entry.flushing = true;
        state.entries.insert(name("f"), entry);

        assert_eq!(state.release_pins(&name("f"), 1), None);
        assert!(state.entries.contains_key("f"));
    }

    #[test]
    fn next_flush_due_skips_pinned_and_deleted() {
        let mut state = CacheState::new(4);
        let t0 = Instant::now();
        let dirty_time = Duration::from_secs(1);

        let mut pinned = CacheEntry::ready(Page::zeroed());
        pinned.mark_dirty(t0);
        pinned.pin_count = 1;
        state.entries.insert(name("pinned"), pinned);

        let mut doomed = CacheEntry::ready(Page::zeroed());
        doomed.mark_dirty(t0);
        doomed.delete_pending = true;
        state.entries.insert(name("doomed"), doomed);
        assert_eq!(state.next_flush_due(dirty_time), None);

        let mut idle = CacheEntry::ready(Page::zeroed());
        idle.mark_dirty(t0 + Duration::from_millis(300));
        state.entries.insert(name("idle"), idle);
        assert_eq!(
            state.next_flush_due(dirty_time),
            Some(t0 + Duration::from_millis(1300))
        );
    }

    #[test]
    #[should_panic(expected = "no cache entry")]
    #[cfg(debug_assertions)]
    fn release_of_unknown_name_asserts() {
        let mut state = CacheState::new(1);
        let _ = state.release_pins(&name("nope"), 1);
    }
}
