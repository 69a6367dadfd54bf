//! Admission controller: atomic group pinning with blocking on capacity.
//!
//! The pin protocol:
//! 1. Under the cache mutex, wait while any requested name is loading in
//!    another thread or being unlinked.
//! 2. Count distinct missing names; evict LRU clean entries to make room,
//!    never touching the requested names. If not enough can be evicted,
//!    wait on the condvar and start over.
//! 3. Pin present names and insert `Loading` placeholders (carrying this
//!    call's pins) for missing ones. Placeholders count toward capacity.
//! 4. Release the mutex, load the missing pages, reacquire, publish.
//! 5. On load failure, drop the placeholders and roll back every pin taken
//!    in step 3, so no partial pin set is ever observable.

use crate::Shared;
use crate::entry::{CacheEntry, EntryState};
use crate::evict::select_victims;
use parking_lot::RwLock;
use pfc_error::{PfcError, Result};
use pfc_store::{FileStore, Page};
use pfc_types::FileName;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

impl<S: FileStore> Shared<S> {
    pub(crate) fn pin(&self, names: &[FileName]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut wanted: BTreeMap<&FileName, usize> = BTreeMap::new();
        for name in names {
            *wanted.entry(name).or_insert(0) += 1;
        }
        if wanted.len() > self.config.max_cache_entries {
            return Err(PfcError::CapacityExceeded {
                requested: wanted.len(),
                capacity: self.config.max_cache_entries,
            });
        }

        let mut state = self.state.lock();
        let missing: Vec<FileName> = loop {
            let busy = wanted.keys().any(|name| {
                state.unlinking.contains(*name)
                    || state.entries.get(*name).is_some_and(CacheEntry::is_loading)
            });
            if busy {
                state.counters.pin_waits += 1;
                trace!(target: "pfc::admission", "pin_wait_peer");
                self.cond.wait(&mut state);
                continue;
            }

            let missing: Vec<FileName> = wanted
                .keys()
                .filter(|name| !state.entries.contains_key(**name))
                .map(|name| (*name).clone())
                .collect();
            let free = state.free_slots();
            if missing.len() > free {
                let need = missing.len() - free;
                let victims = select_victims(&state.entries, need, |name| {
                    wanted.contains_key(name)
                });
                if victims.len() < need {
                    state.counters.pin_waits += 1;
                    debug!(
                        target: "pfc::admission",
                        need,
                        evictable = victims.len(),
                        resident = state.entries.len(),
                        "pin_blocked"
                    );
                    self.cond.wait(&mut state);
                    continue;
                }
                for victim in victims {
                    let _ = state.entries.remove(&victim);
                    state.counters.evictions += 1;
                    trace!(target: "pfc::admission", name = %victim, "evicted");
                }
            }
            break missing;
        };

        let st = &mut *state;
        for (name, count) in &wanted {
            if let Some(entry) = st.entries.get_mut(*name) {
                entry.pin_count += count;
                st.counters.hits += 1;
            } else {
                st.entries
                    .insert((*name).clone(), CacheEntry::loading(*count));
            }
        }
        debug_assert!(st.entries.len() <= st.capacity);
        if missing.is_empty() {
            drop(state);
            self.cond.notify_all();
            return Ok(());
        }
        drop(state);

        let mut loaded: Vec<(&FileName, Page)> = Vec::with_capacity(missing.len());
        let mut failure = None;
        for name in &missing {
            match self.store.load(name) {
                Ok(page) => loaded.push((name, page)),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        let mut state = self.state.lock();
        let Some(err) = failure else {
            for (name, page) in loaded {
                if let Some(entry) = state.entries.get_mut(name) {
                    entry.state = EntryState::Ready(Arc::new(RwLock::new(page)));
                }
                state.counters.loads += 1;
            }
            debug!(target: "pfc::admission", loaded = missing.len(), "pin_loaded");
            drop(state);
            self.cond.notify_all();
            return Ok(());
        };

        state.counters.load_failures += 1;
        let mut reap = Vec::new();
        for name in &missing {
            // A delete that arrived while loading still has to take effect.
            if let Some(entry) = state.entries.remove(name) {
                if entry.delete_pending {
                    state.unlinking.insert(name.clone());
                    state.counters.deletes += 1;
                    reap.push(name.clone());
                }
            }
        }
        for (name, count) in &wanted {
            if missing.contains(*name) {
                continue;
            }
            if let Some(doomed) = state.release_pins(name, *count) {
                reap.push(doomed);
            }
        }
        drop(state);
        self.cond.notify_all();
        warn!(target: "pfc::admission", error = %err, "pin_load_failed");
        let _ = self.finish_unlinks(&reap);
        Err(err)
    }

    pub(crate) fn unpin(&self, names: &[FileName]) {
        let mut state = self.state.lock();
        let reap: Vec<FileName> = names
            .iter()
            .filter_map(|name| state.release_pins(name, 1))
            .collect();
        drop(state);
        self.cond.notify_all();
        let _ = self.finish_unlinks(&reap);
    }
}
