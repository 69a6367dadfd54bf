//! Deletion manager.
//!
//! A delete of a held entry (caller pins or an in-flight flush) only sets
//! `delete_pending`; the last release reaps it. Otherwise the entry is
//! dropped at once, dirty or not, and the backing file is unlinked with the
//! mutex released. While that unlink runs the name sits in `unlinking`, and
//! pinners of it wait so they never load a file that is about to vanish.

use crate::Shared;
use pfc_error::Result;
use pfc_store::FileStore;
use pfc_types::FileName;
use tracing::{debug, warn};

impl<S: FileStore> Shared<S> {
    pub(crate) fn delete(&self, name: &FileName) -> Result<()> {
        let mut state = self.state.lock();
        while state.unlinking.contains(name) {
            self.cond.wait(&mut state);
        }

        let st = &mut *state;
        if let Some(entry) = st.entries.get_mut(name) {
            if entry.is_held() {
                entry.delete_pending = true;
                debug!(
                    target: "pfc::delete",
                    name = %name,
                    pins = entry.pin_count,
                    dirty = entry.dirty,
                    "delete_deferred"
                );
                return Ok(());
            }
            let _ = st.begin_unlink(name);
        } else {
            st.unlinking.insert(name.clone());
            st.counters.deletes += 1;
        }
        drop(state);
        self.finish_unlinks(std::slice::from_ref(name))
    }

    /// Unlink names previously moved into `unlinking`, then clear them.
    ///
    /// Every name is attempted; the first failure is returned.
    pub(crate) fn finish_unlinks(&self, names: &[FileName]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut first_err = None;
        for name in names {
            match self.store.remove(name) {
                Ok(removed) => {
                    debug!(target: "pfc::delete", name = %name, removed, "delete_unlinked");
                }
                Err(err) => {
                    warn!(target: "pfc::delete", name = %name, error = %err, "unlink_failed");
                    first_err.get_or_insert(err);
                }
            }
        }

        let mut state = self.state.lock();
        for name in names {
            state.unlinking.remove(name);
        }
        drop(state);
        self.cond.notify_all();
        first_err.map_or(Ok(()), Err)
    }
}
