//! Eviction policy: LRU over clean, unpinned entries.
//!
//! Eviction never performs I/O. Dirty entries only become candidates after
//! the flusher has written them back, so admission under pressure waits for
//! writeback instead of forcing it.

use crate::entry::CacheEntry;
use pfc_types::FileName;
use std::collections::HashMap;

/// Pick up to `k` victims, oldest unpin first.
///
/// Candidates are entries with no pins (caller or flusher), not dirty, not
/// delete-pending, and not loading. Names for which `exclude` returns true
/// are skipped; admission uses this to protect the names it is pinning.
/// Returns fewer than `k` names when not enough candidates exist.
pub(crate) fn select_victims(
    entries: &HashMap<FileName, CacheEntry>,
    k: usize,
    exclude: impl Fn(&FileName) -> bool,
) -> Vec<FileName> {
    if k == 0 {
        return Vec::new();
    }
    let mut candidates: Vec<(&FileName, &CacheEntry)> = entries
        .iter()
        .filter(|(name, entry)| entry.is_evictable() && !exclude(name))
        .collect();
    candidates.sort_unstable_by_key(|(_, entry)| (entry.last_unpin, entry.unpin_seq));
    candidates
        .into_iter()
        .take(k)
        .map(|(name, _)| name.clone())
        .collect()
}
