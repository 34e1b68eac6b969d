use tracing::{debug, warn};

use sheetkeep_core::{Field, Row, RowId};

use crate::AutosaveEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The receipt matches the row as it stands now; the row is clean.
    /// `adopted` lists cells rewritten to the store's canonical form.
    Confirmed { adopted: Vec<Field> },
    /// A newer edit arrived while the save was out. The row stays unsaved.
    Diverged,
    /// The store folded the row into the record row `holder` already owns.
    /// The identity is not adopted; the row stays unsaved and flagged.
    SharedIdentity { holder: usize },
}

impl AutosaveEngine {
    /// Compare a save receipt against the row's value at this moment, not the
    /// value that was sent.
    pub(crate) fn verify_receipt(&mut self, index: usize, receipt: Row) -> Verification {
        if let Some(holder) = receipt.id.and_then(|id| self.identity_holder(id, index)) {
            return self.refuse_shared_identity(index, holder);
        }
        let Some(current) = self.state.rows.get_mut(index) else {
            return Verification::Diverged;
        };

        if !current.matches_receipt(&receipt) {
            // Identity is still adopted so the follow-up save updates the
            // record this one created instead of creating another.
            if current.id.is_none() && receipt.id.is_some() {
                current.id = receipt.id;
                if let Some(pending) = self.state.pending.get_mut(&index) {
                    pending.id = receipt.id;
                }
            }
            debug!(row = index, "receipt superseded by newer edit");
            return Verification::Diverged;
        }

        let adopted = current.differing_fields(&receipt);
        for field in &adopted {
            current.set(*field, receipt.get(*field).map(str::to_string));
            self.surface.write_field(index, *field, receipt.get(*field));
        }
        current.id = receipt.id;

        self.state.unsaved.remove(&index);
        // A quiet period still running for this exact value would only
        // resave what the store already holds.
        if self.row_timers.contains(index) {
            self.row_timers.cancel(index);
            self.state.pending.remove(&index);
        }
        debug!(row = index, adopted = adopted.len(), "receipt confirmed");
        Verification::Confirmed { adopted }
    }

    /// Another row that already carries `id`.
    pub(crate) fn identity_holder(&self, id: RowId, index: usize) -> Option<usize> {
        self.state
            .rows
            .iter()
            .enumerate()
            .find_map(|(other, row)| (other != index && row.id == Some(id)).then_some(other))
    }

    fn refuse_shared_identity(&mut self, index: usize, holder: usize) -> Verification {
        warn!(row = index, holder, "store merged row into another row's record");
        self.flag_overlap(index, holder);
        // The holder's record now carries this row's content; put it back.
        let restorable = self
            .state
            .rows
            .get(holder)
            .is_some_and(|row| row.is_complete(&self.catalog));
        if restorable {
            self.execute_save(holder);
        } else if let Some(row) = self.state.rows.get(holder).cloned() {
            self.state.unsaved.insert(holder, row);
        }
        Verification::SharedIdentity { holder }
    }
}
