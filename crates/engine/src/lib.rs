pub mod error;
mod events;
pub mod executor;
pub mod receipt;
pub mod reconcile;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod surface;

pub use error::EngineError;
pub use executor::{InFlightSave, SaveToken};
pub use receipt::Verification;
pub use reconcile::ReconcileReport;
pub use scheduler::{BatchKey, BatchOutcome, TimerId};
pub use state::SessionState;
pub use status::{SaveStatus, StatusTracker};
pub use surface::{EditSurface, NullSurface, Validity};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use sheetkeep_core::overlap::{first_overlap, is_overlap_error};
use sheetkeep_core::{Catalog, EditVerdict, EngineConfig, Field, FieldValidator, Row, ValidationError};
use sheetkeep_storage::RecordStore;

use crate::events::EngineEvent;
use crate::scheduler::{Timer, TimerMap};

/// One discrete cell change reported by the editing grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellEdit {
    pub row: usize,
    pub field: Field,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl CellEdit {
    pub fn new(row: usize, field: Field, old_value: Option<&str>, new_value: Option<&str>) -> Self {
        Self {
            row,
            field,
            old_value: old_value.map(str::to_string),
            new_value: new_value.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// The value was taken and the row's quiet period restarted. `cleared`
    /// lists dependent fields reset by cascade.
    Accepted { cleared: Vec<Field> },
    /// The old value was written back; nothing was scheduled.
    Reverted(ValidationError),
    /// The cell already held this value.
    Unchanged,
}

/// Autosave engine for one editing session.
///
/// Timers and persistence calls run as spawned tasks and report back over an
/// internal channel; the owner drives the engine with [`process_next`] or
/// [`run_until_idle`], so every state change happens on the owning task.
///
/// [`process_next`]: AutosaveEngine::process_next
/// [`run_until_idle`]: AutosaveEngine::run_until_idle
pub struct AutosaveEngine {
    state: SessionState,
    catalog: Catalog,
    config: EngineConfig,
    store: Arc<dyn RecordStore>,
    surface: Box<dyn EditSurface>,
    status: StatusTracker,
    row_timers: TimerMap<usize>,
    batch_timers: TimerMap<BatchKey>,
    status_hold: Option<Timer>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    next_ticket: u64,
    /// Superseded or orphaned saves whose results have not come back yet.
    detached_saves: usize,
    pending_deletes: usize,
}

impl AutosaveEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        catalog: Catalog,
        config: EngineConfig,
        surface: Box<dyn EditSurface>,
        rows: Vec<Row>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let status = StatusTracker::new(config.minimum_visible());
        Self {
            state: SessionState::new(rows),
            catalog,
            config,
            store,
            surface,
            status,
            row_timers: TimerMap::new(),
            batch_timers: TimerMap::new(),
            status_hold: None,
            events_tx,
            events_rx,
            next_ticket: 0,
            detached_saves: 0,
            pending_deletes: 0,
        }
    }

    /// Start a session from the store's current listing. An empty listing
    /// yields a single blank row to type into.
    pub async fn load(
        store: Arc<dyn RecordStore>,
        catalog: Catalog,
        config: EngineConfig,
        surface: Box<dyn EditSurface>,
    ) -> Result<Self, EngineError> {
        let mut rows = store.list_all().await?;
        if rows.is_empty() {
            rows.push(Row::blank());
        }
        debug!(rows = rows.len(), "session loaded");
        let mut engine = Self::new(store, catalog, config, surface, rows);
        engine.surface.replace_rows(&engine.state.rows);
        Ok(engine)
    }

    pub fn rows(&self) -> &[Row] {
        &self.state.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.state.rows.get(index)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> SaveStatus {
        self.status.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.status.subscribe()
    }

    pub fn validation_errors(&self) -> &[ValidationError] {
        &self.state.errors
    }

    pub fn pending_rows(&self) -> Vec<usize> {
        self.state.pending.keys().copied().collect()
    }

    pub fn in_flight_rows(&self) -> Vec<usize> {
        self.state.in_flight.keys().copied().collect()
    }

    pub fn unsaved_rows(&self) -> Vec<usize> {
        self.state.unsaved.keys().copied().collect()
    }

    /// No timers, saves, deletes or status holds are outstanding.
    pub fn is_idle(&self) -> bool {
        !self.has_outstanding_work()
    }

    fn has_outstanding_work(&self) -> bool {
        !self.row_timers.is_empty()
            || !self.batch_timers.is_empty()
            || !self.state.in_flight.is_empty()
            || self.status_hold.is_some()
            || self.detached_saves > 0
            || self.pending_deletes > 0
    }

    // ====================================================================
    // Editing surface events
    // ====================================================================

    pub fn append_row(&mut self) -> usize {
        self.state.rows.push(Row::blank());
        self.state.rows.len() - 1
    }

    /// Validate one cell change, apply it with cascade, and restart the row's
    /// quiet period. An edit one past the last row grows the working set.
    pub fn apply_edit(&mut self, edit: CellEdit) -> Result<EditOutcome, EngineError> {
        let len = self.state.rows.len();
        if edit.row > len {
            return Err(EngineError::RowOutOfRange { index: edit.row, len });
        }
        if edit.row == len {
            self.append_row();
        }
        let index = edit.row;
        let field = edit.field;
        let current = self.state.rows[index].clone();

        let incoming = edit.new_value.as_deref().map(str::trim).filter(|v| !v.is_empty());
        if current.get(field) == incoming {
            return Ok(EditOutcome::Unchanged);
        }

        let validator = FieldValidator::new(&self.catalog, self.config.time_step_minutes);
        match validator.check(index, field, edit.old_value.as_deref(), incoming, &current) {
            EditVerdict::Revert {
                field,
                old_value,
                error,
            } => {
                debug!(row = index, field = field.as_str(), message = %error.message, "edit reverted");
                self.surface.write_field(index, field, old_value.as_deref());
                self.surface
                    .annotate(index, field, Validity::Invalid(error.message.clone()));
                self.state.record_error(error.clone());
                Ok(EditOutcome::Reverted(error))
            }
            EditVerdict::Accept { row, cleared } => {
                self.state.rows[index] = row;
                self.state.clear_error(index, field);
                self.surface.annotate(index, field, Validity::Valid);
                for dependent in &cleared {
                    self.state.clear_error(index, *dependent);
                    self.surface.write_field(index, *dependent, None);
                }
                self.refresh_overlap_errors();
                self.state.unsaved.insert(index, self.state.rows[index].clone());
                self.status.on_edit();
                self.schedule_save(index);
                Ok(EditOutcome::Accepted { cleared })
            }
        }
    }

    /// Ingest a pasted block anchored at `(anchor_row, anchor_field)`. All
    /// cells of a row are applied before the row is validated; rejected cells
    /// keep their old value. Rows without a rejected cell then go to the
    /// executor as one batch.
    pub fn ingest_paste(
        &mut self,
        block: &[Vec<Option<String>>],
        anchor_row: usize,
        anchor_field: usize,
    ) -> Result<BatchOutcome, EngineError> {
        let len = self.state.rows.len();
        if anchor_row > len {
            return Err(EngineError::RowOutOfRange { index: anchor_row, len });
        }
        if Field::from_index(anchor_field).is_none() {
            return Err(EngineError::FieldOutOfRange { index: anchor_field });
        }
        while self.state.rows.len() < anchor_row + block.len() {
            self.append_row();
        }

        let validator = FieldValidator::new(&self.catalog, self.config.time_step_minutes);
        let mut touched = Vec::with_capacity(block.len());
        let mut rejected = Vec::new();
        for (offset, cells) in block.iter().enumerate() {
            let index = anchor_row + offset;
            let before = self.state.rows[index].clone();
            // Columns past the last field are dropped.
            let cells: Vec<(Field, Option<&str>)> = cells
                .iter()
                .enumerate()
                .map_while(|(column, cell)| {
                    Field::from_index(anchor_field + column).map(|field| (field, cell.as_deref()))
                })
                .collect();

            let verdict = validator.check_cells(index, &before, &cells);
            for (field, _) in &cells {
                self.state.clear_error(index, *field);
            }
            for error in &verdict.reverted {
                self.surface.write_field(index, error.field, before.get(error.field));
                self.surface
                    .annotate(index, error.field, Validity::Invalid(error.message.clone()));
                self.state.record_error(error.clone());
            }
            for dependent in &verdict.cleared {
                self.state.clear_error(index, *dependent);
                self.surface.write_field(index, *dependent, None);
            }

            let changed = verdict.row != before;
            self.state.rows[index] = verdict.row;
            if verdict.reverted.is_empty() {
                touched.push(index);
            } else {
                debug!(row = index, reverted = verdict.reverted.len(), "pasted row held back");
                self.row_timers.cancel(index);
                self.state.pending.remove(&index);
                if changed {
                    self.state.unsaved.insert(index, self.state.rows[index].clone());
                }
                rejected.push(index);
            }
        }

        self.refresh_overlap_errors();
        if !block.is_empty() {
            self.status.on_edit();
        }
        let mut outcome = self.schedule_batch(&touched);
        outcome.rejected = rejected;
        Ok(outcome)
    }

    /// Remove `count` rows starting at `start` and return them. A single
    /// identified row is deleted from the store right away; larger removals
    /// arm the batch window, which ends in a full reconciliation.
    pub fn remove_rows(&mut self, start: usize, count: usize) -> Result<Vec<Row>, EngineError> {
        let len = self.state.rows.len();
        if start.checked_add(count).is_none_or(|end| end > len) {
            return Err(EngineError::RemovalOutOfRange { start, count, len });
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let removed: Vec<Row> = self.state.rows.drain(start..start + count).collect();
        let dropped = self.state.remove_range(start, count);
        self.detached_saves += dropped.len();
        self.row_timers.remove_range(start, count);
        debug!(start, count, dropped_saves = dropped.len(), "rows removed");

        if count == 1 {
            if let Some(id) = removed[0].id {
                let store = Arc::clone(&self.store);
                let tx = self.events_tx.clone();
                self.pending_deletes += 1;
                tokio::spawn(async move {
                    let result = store.delete(id).await;
                    let _ = tx.send(EngineEvent::DeleteSettled { id, result });
                });
            }
        } else {
            self.arm_batch_window(BatchKey::Removal);
        }

        self.update_status();
        Ok(removed)
    }

    // ====================================================================
    // Event pump
    // ====================================================================

    /// Wait for the next timer or persistence completion and apply it.
    /// Returns `false` once nothing is outstanding.
    pub async fn process_next(&mut self) -> bool {
        if !self.has_outstanding_work() {
            return false;
        }
        let Some(event) = self.events_rx.recv().await else {
            return false;
        };
        if self.dispatch(event) {
            if let Err(e) = self.flush_all().await {
                warn!(error = %e, "batch window flush failed");
            }
        }
        true
    }

    pub async fn run_until_idle(&mut self) {
        while self.process_next().await {}
    }

    /// Final reconciliation on teardown.
    pub async fn shutdown(mut self) -> Result<ReconcileReport, EngineError> {
        let report = self.flush_all().await?;
        self.run_until_idle().await;
        Ok(report)
    }

    /// Apply one event. Returns `true` when a batch window asks for a full
    /// flush, which the caller runs.
    fn dispatch(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::QuietPeriodElapsed { timer } => {
                self.on_quiet_period_elapsed(timer);
                self.update_status();
                false
            }
            EngineEvent::BatchWindowElapsed { timer } => match self.batch_timers.take_fired(timer) {
                Some(key) => {
                    debug!(?key, "batch window elapsed");
                    true
                }
                None => false,
            },
            EngineEvent::SaveSettled { token, result } => {
                self.settle_save(token, result);
                false
            }
            EngineEvent::DeleteSettled { id, result } => {
                self.pending_deletes = self.pending_deletes.saturating_sub(1);
                match result {
                    Ok(()) => debug!(id = %id, "record deleted"),
                    Err(e) => warn!(id = %id, error = %e, "delete failed"),
                }
                false
            }
            EngineEvent::StatusHoldElapsed { timer } => {
                let ours = self.status_hold.as_ref().is_some_and(|hold| hold.id == timer);
                if ours {
                    self.status_hold = None;
                    if self.state.in_flight.is_empty() {
                        self.status.on_hold_elapsed(self.state.settled_status());
                    }
                }
                false
            }
        }
    }

    /// Process completions until no save or delete is outstanding. Timers
    /// keep running; a batch window that fires meanwhile is dropped since the
    /// caller is about to reconcile anyway.
    async fn settle_outstanding(&mut self) {
        while !self.state.in_flight.is_empty() || self.detached_saves > 0 || self.pending_deletes > 0 {
            let Some(event) = self.events_rx.recv().await else {
                return;
            };
            self.dispatch(event);
        }
    }

    // ====================================================================
    // Status
    // ====================================================================

    /// Recompute the indicator once nothing is in flight, honouring the
    /// minimum visible duration of `InProgress`.
    pub(crate) fn update_status(&mut self) {
        if !self.state.in_flight.is_empty() || self.status_hold.is_some() {
            return;
        }
        let target = self.state.settled_status();
        if let Some(remaining) = self.status.on_settled(Instant::now(), target) {
            self.start_status_hold(remaining);
        }
    }

    /// Re-check each standing overlap error against the current rows. Errors
    /// that no longer hold are cleared; the rest are renamed to the row they
    /// now collide with.
    fn refresh_overlap_errors(&mut self) {
        let flagged: Vec<usize> = self
            .state
            .errors
            .iter()
            .filter(|e| is_overlap_error(e))
            .map(|e| e.row)
            .collect();
        for index in flagged {
            match first_overlap(&self.state.rows, &self.catalog, index) {
                Some(blocker) => self.flag_overlap(index, blocker),
                None => {
                    debug!(row = index, "overlap resolved");
                    self.state.clear_error(index, Field::TimeIn);
                    self.surface.annotate(index, Field::TimeIn, Validity::Valid);
                }
            }
        }
    }

    fn start_status_hold(&mut self, remaining: Duration) {
        let id = self.next_timer_id();
        let timer = Timer::spawn(
            id,
            remaining,
            &self.events_tx,
            EngineEvent::StatusHoldElapsed { timer: id },
        );
        self.status_hold = Some(timer);
        debug!(remaining_ms = remaining.as_millis() as u64, "holding in-progress status");
    }

    pub(crate) fn cancel_status_hold(&mut self) {
        if let Some(hold) = self.status_hold.take() {
            hold.cancel();
        }
    }

    pub(crate) fn next_timer_id(&mut self) -> TimerId {
        self.next_ticket += 1;
        TimerId(self.next_ticket)
    }

    pub(crate) fn next_save_token(&mut self) -> SaveToken {
        self.next_ticket += 1;
        SaveToken(self.next_ticket)
    }
}
