use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, warn};

use sheetkeep_core::Row;
use sheetkeep_storage::{Receipt, RecordStore, StorageError};

use crate::events::EngineEvent;
use crate::AutosaveEngine;

/// Per-attempt cancellation token. A save applies its result only while its
/// token is still the one registered for the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SaveToken(pub(crate) u64);

#[derive(Debug, Clone)]
pub struct InFlightSave {
    pub token: SaveToken,
    pub started: Instant,
    /// The row as it was handed to the store.
    pub snapshot: Row,
}

async fn persist(store: &dyn RecordStore, row: &Row) -> Result<Receipt, StorageError> {
    match row.id {
        Some(_) => store.update(row).await,
        None => store.create(row).await,
    }
}

impl AutosaveEngine {
    /// Issue one save for the row's current value, superseding any save
    /// already in flight for it.
    pub(crate) fn execute_save(&mut self, index: usize) {
        let Some(row) = self.state.rows.get(index).cloned() else {
            return;
        };

        if let Some(previous) = self.state.in_flight.remove(&index) {
            debug!(row = index, token = ?previous.token, "superseding in-flight save");
            self.detached_saves += 1;
        }

        let token = self.next_save_token();
        let now = Instant::now();
        self.state.unsaved.insert(index, row.clone());
        self.state.in_flight.insert(
            index,
            InFlightSave {
                token,
                started: now,
                snapshot: row.clone(),
            },
        );
        self.cancel_status_hold();
        self.status.on_save_issued(now);

        let store = Arc::clone(&self.store);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = persist(store.as_ref(), &row).await;
            let _ = tx.send(EngineEvent::SaveSettled { token, result });
        });
        debug!(row = index, token = ?token, "save issued");
    }

    pub(crate) fn settle_save(&mut self, token: SaveToken, result: Result<Receipt, StorageError>) {
        let Some(index) = self.state.in_flight_index(token) else {
            // Superseded, or the row went away: never touches the working set.
            self.detached_saves = self.detached_saves.saturating_sub(1);
            debug!(token = ?token, "discarding stale save result");
            return;
        };
        let Some(save) = self.state.in_flight.remove(&index) else {
            return;
        };

        match result {
            Ok(receipt) => {
                debug!(
                    row = index,
                    disposition = receipt.disposition.as_str(),
                    elapsed_ms = save.started.elapsed().as_millis() as u64,
                    "save settled"
                );
                self.verify_receipt(index, receipt.record);
            }
            Err(e) => {
                warn!(row = index, error = %e, "save failed; row stays unsaved");
            }
        }
        self.update_status();
    }
}
