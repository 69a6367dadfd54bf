//! Background writeback.
//!
//! The flush protocol for one pass:
//! 1. Under the mutex, select flushable entries (dirty, unpinned, not
//!    delete-pending), set their `flushing` pin, and record `dirty_epoch`.
//! 2. With the mutex released, copy each page and store it. A page whose
//!    lock is held by a writer is skipped and stays dirty.
//! 3. Reacquire; clear `flushing`; clear `dirty` only where the epoch is
//!    unchanged. Entries re-dirtied during the store stay dirty for the next
//!    pass. Entries that became delete-pending meanwhile are reaped.
//! 4. Broadcast so pinners blocked on capacity can retry eviction.

use crate::Shared;
use crate::entry::SharedPage;
use pfc_error::{PfcError, Result};
use pfc_store::FileStore;
use pfc_types::FileName;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Which dirty entries a pass writes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushSelect {
    /// Entries dirty for at least `dirty_time` as of the given instant.
    Due(Instant),
    /// Every flushable entry regardless of age.
    All,
}

/// Outcome of one writeback pass.
#[derive(Debug, Default)]
pub(crate) struct FlushReport {
    pub(crate) selected: usize,
    pub(crate) cleaned: usize,
    pub(crate) redirtied: usize,
    /// Pages left dirty because a view held their write lock.
    pub(crate) skipped: usize,
    pub(crate) failed: usize,
    pub(crate) first_error: Option<PfcError>,
}

struct FlushJob {
    name: FileName,
    page: SharedPage,
    epoch: u64,
}

impl<S: FileStore> Shared<S> {
    pub(crate) fn flush_pass(&self, select: FlushSelect) -> FlushReport {
        let dirty_time = self.config.dirty_time;
        let mut state = self.state.lock();
        let mut jobs = Vec::new();
        for (name, entry) in &mut state.entries {
            if !entry.is_flushable() {
                continue;
            }
            if let FlushSelect::Due(now) = select {
                let due = entry
                    .dirty_since
                    .is_some_and(|since| now.saturating_duration_since(since) >= dirty_time);
                if !due {
                    continue;
                }
            }
            let Some(page) = entry.page() else {
                continue;
            };
            jobs.push(FlushJob {
                name: name.clone(),
                page: Arc::clone(page),
                epoch: entry.dirty_epoch,
            });
            entry.flushing = true;
        }
        drop(state);

        let mut report = FlushReport {
            selected: jobs.len(),
            ..FlushReport::default()
        };
        if jobs.is_empty() {
            return report;
        }
        debug!(target: "pfc::flusher", selected = report.selected, "flush_cycle_start");

        let results: Vec<Option<Result<()>>> = jobs
            .iter()
            .map(|job| {
                let copy = job.page.try_read()?.clone();
                Some(self.store.store(&job.name, copy.as_slice()))
            })
            .collect();

        let mut state = self.state.lock();
        let mut reap = Vec::new();
        for (job, result) in jobs.iter().zip(results) {
            let st = &mut *state;
            let Some(entry) = st.entries.get_mut(&job.name) else {
                continue;
            };
            entry.flushing = false;
            match result {
                None => {
                    report.skipped += 1;
                    debug!(target: "pfc::flusher", name = %job.name, "flush_skipped_busy");
                }
                Some(Ok(())) if entry.dirty_epoch == job.epoch => {
                    entry.mark_clean();
                    st.counters.flushes += 1;
                    report.cleaned += 1;
                    trace!(target: "pfc::flusher", name = %job.name, "flush_success");
                }
                Some(Ok(())) => {
                    st.counters.flushes += 1;
                    report.redirtied += 1;
                    debug!(target: "pfc::flusher", name = %job.name, "flush_redirtied");
                }
                Some(Err(err)) => {
                    st.counters.flush_failures += 1;
                    report.failed += 1;
                    warn!(
                        target: "pfc::flusher",
                        name = %job.name,
                        error = %err,
                        "flush_failed"
                    );
                    report.first_error.get_or_insert(err);
                }
            }
            if entry.delete_pending && entry.pin_count == 0 {
                reap.push(st.begin_unlink(&job.name));
            }
        }
        drop(state);
        self.cond.notify_all();
        let _ = self.finish_unlinks(&reap);
        report
    }

    /// Reap delete-pending entries nobody holds any more.
    pub(crate) fn reap_pending_deletes(&self) -> Result<()> {
        let mut state = self.state.lock();
        let doomed: Vec<FileName> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.delete_pending && !entry.is_held())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &doomed {
            let _ = state.begin_unlink(name);
        }
        drop(state);
        self.finish_unlinks(&doomed)
    }
}

/// Flusher thread body. Runs until `stopping` is set.
pub(crate) fn run<S: FileStore>(shared: &Shared<S>) {
    let tick = shared.config.effective_flush_interval();
    let dirty_time = shared.config.dirty_time;
    let mut backoff_until: Option<Instant> = None;
    info!(
        target: "pfc::flusher",
        dirty_time = ?dirty_time,
        tick = ?tick,
        "flusher_started"
    );

    loop {
        {
            let mut state = shared.state.lock();
            if state.stopping {
                break;
            }
            let now = Instant::now();
            let mut wake = now + tick;
            if let Some(due) = state.next_flush_due(dirty_time) {
                wake = wake.min(due);
            }
            if let Some(until) = backoff_until {
                wake = wake.max(until);
            }
            if wake > now {
                let _ = shared.cond.wait_until(&mut state, wake);
            }
            if state.stopping {
                break;
            }
        }

        let now = Instant::now();
        if backoff_until.is_some_and(|until| now < until) {
            continue;
        }
        backoff_until = None;

        let report = shared.flush_pass(FlushSelect::Due(now));
        if report.failed > 0 || report.skipped > 0 {
            backoff_until = Some(Instant::now() + tick);
        }
    }
    debug!(target: "pfc::flusher", "flusher_stopped");
}
