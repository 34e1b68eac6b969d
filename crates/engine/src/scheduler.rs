use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tracing::debug;

use sheetkeep_core::overlap::{find_overlaps, overlap_error};
use sheetkeep_core::Field;

use crate::events::EngineEvent;
use crate::state::remove_and_shift;
use crate::surface::Validity;
use crate::AutosaveEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u64);

/// Keys for the batch-window timer space. Kept apart from per-row timers
/// so neither can cancel the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BatchKey {
    Removal,
}

pub(crate) struct Timer {
    pub id: TimerId,
    handle: AbortHandle,
}

impl Timer {
    /// Sleep for `delay`, then report `event` to the engine.
    pub fn spawn(
        id: TimerId,
        delay: Duration,
        tx: &UnboundedSender<EngineEvent>,
        event: EngineEvent,
    ) -> Self {
        let tx = tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        })
        .abort_handle();
        Self { id, handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

/// Debounce timers keyed by `K`. Starting a timer for a key cancels the
/// one already running for it.
pub(crate) struct TimerMap<K> {
    timers: BTreeMap<K, Timer>,
}

impl<K: Ord + Copy> TimerMap<K> {
    pub fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: K, timer: Timer) {
        if let Some(old) = self.timers.insert(key, timer) {
            old.cancel();
        }
    }

    pub fn cancel(&mut self, key: K) -> bool {
        match self.timers.remove(&key) {
            Some(timer) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in std::mem::take(&mut self.timers) {
            timer.cancel();
        }
    }

    /// Resolve a fired timer to its key. A timer that was cancelled or
    /// replaced after it fired no longer resolves.
    pub fn take_fired(&mut self, id: TimerId) -> Option<K> {
        let key = self
            .timers
            .iter()
            .find(|(_, timer)| timer.id == id)
            .map(|(key, _)| *key)?;
        self.timers.remove(&key);
        Some(key)
    }

    pub fn contains(&self, key: K) -> bool {
        self.timers.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl TimerMap<usize> {
    pub fn remove_range(&mut self, start: usize, count: usize) {
        for timer in remove_and_shift(&mut self.timers, start, count) {
            timer.cancel();
        }
    }
}

/// What a batch hand-off did with each row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows sent straight to the save executor.
    pub saved: Vec<usize>,
    /// Rows missing required fields; left pending without a timer.
    pub deferred: Vec<usize>,
    /// Rows excluded because they overlap an earlier row.
    pub conflicts: Vec<usize>,
    /// Pasted rows with a rejected cell; kept unsaved and not sent.
    pub rejected: Vec<usize>,
}

impl AutosaveEngine {
    /// Restart the quiet period for `index` with the row's current value.
    pub(crate) fn schedule_save(&mut self, index: usize) {
        let Some(row) = self.state.rows.get(index) else {
            return;
        };
        self.state.pending.insert(index, row.clone());
        let id = self.next_timer_id();
        let timer = Timer::spawn(
            id,
            self.config.quiet_period(),
            &self.events_tx,
            EngineEvent::QuietPeriodElapsed { timer: id },
        );
        self.row_timers.insert(index, timer);
        debug!(row = index, "quiet period (re)started");
    }

    pub(crate) fn on_quiet_period_elapsed(&mut self, timer: TimerId) {
        let Some(index) = self.row_timers.take_fired(timer) else {
            return;
        };
        self.state.pending.remove(&index);
        let Some(row) = self.state.rows.get(index) else {
            return;
        };
        if row.is_blank() && row.id.is_none() {
            self.state.unsaved.remove(&index);
            return;
        }
        if !row.is_complete(&self.catalog) {
            debug!(row = index, missing = ?row.missing_fields(&self.catalog), "row incomplete, not saving");
            return;
        }
        let blocker = find_overlaps(&self.state.rows, &self.catalog)
            .into_iter()
            .find_map(|(flagged, blocker)| (flagged == index).then_some(blocker));
        if let Some(blocker) = blocker {
            debug!(row = index, blocker, "row overlaps an earlier row, not saving");
            self.flag_overlap(index, blocker);
            self.update_status();
            return;
        }
        self.execute_save(index);
    }

    /// Mark row `index` as colliding with `blocker`. The row stays unsaved.
    pub(crate) fn flag_overlap(&mut self, index: usize, blocker: usize) {
        let Some(row) = self.state.rows.get(index).cloned() else {
            return;
        };
        let error = overlap_error(index, blocker);
        self.surface
            .annotate(index, Field::TimeIn, Validity::Invalid(error.message.clone()));
        self.state.record_error(error);
        self.state.unsaved.insert(index, row);
    }

    /// Hand a block of rows to the executor without waiting for a quiet
    /// period. Incomplete rows stay pending; overlapping rows are flagged and
    /// left out.
    pub fn schedule_batch(&mut self, indices: &[usize]) -> BatchOutcome {
        let overlaps: BTreeMap<usize, usize> =
            find_overlaps(&self.state.rows, &self.catalog).into_iter().collect();
        let mut outcome = BatchOutcome::default();

        for &index in indices {
            let Some(row) = self.state.rows.get(index).cloned() else {
                continue;
            };
            self.row_timers.cancel(index);

            if !row.is_complete(&self.catalog) {
                self.state.pending.insert(index, row.clone());
                self.state.unsaved.insert(index, row);
                outcome.deferred.push(index);
                continue;
            }

            self.state.pending.remove(&index);
            if let Some(&blocker) = overlaps.get(&index) {
                self.flag_overlap(index, blocker);
                outcome.conflicts.push(index);
                continue;
            }

            self.execute_save(index);
            outcome.saved.push(index);
        }

        debug!(
            saved = outcome.saved.len(),
            deferred = outcome.deferred.len(),
            conflicts = outcome.conflicts.len(),
            "batch handed off"
        );
        self.update_status();
        outcome
    }

    /// Cancel every quiet period and push all pending or unsaved complete
    /// rows that overlap nothing earlier to the executor now. Returns how many saves were issued.
    pub fn flush_pending(&mut self) -> usize {
        let mut indices: Vec<usize> = self
            .state
            .pending
            .keys()
            .chain(self.state.unsaved.keys())
            .copied()
            .collect();
        indices.sort_unstable();
        indices.dedup();

        let overlaps: BTreeMap<usize, usize> =
            find_overlaps(&self.state.rows, &self.catalog).into_iter().collect();
        let mut issued = 0;
        for index in indices {
            self.row_timers.cancel(index);
            self.state.pending.remove(&index);
            let Some(row) = self.state.rows.get(index) else {
                continue;
            };
            if !row.is_complete(&self.catalog) {
                continue;
            }
            if let Some(&blocker) = overlaps.get(&index) {
                self.flag_overlap(index, blocker);
                continue;
            }
            let already_sent = self
                .state
                .in_flight
                .get(&index)
                .is_some_and(|save| save.snapshot == *row);
            if already_sent {
                continue;
            }
            self.execute_save(index);
            issued += 1;
        }
        self.update_status();
        issued
    }

    pub(crate) fn arm_batch_window(&mut self, key: BatchKey) {
        let id = self.next_timer_id();
        let timer = Timer::spawn(
            id,
            self.config.batch_window(),
            &self.events_tx,
            EngineEvent::BatchWindowElapsed { timer: id },
        );
        self.batch_timers.insert(key, timer);
        debug!(?key, "batch window armed");
    }
}
