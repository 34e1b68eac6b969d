use std::collections::{BTreeMap, BTreeSet};

use tokio::time::Instant;
use tracing::{info, warn};

use sheetkeep_core::overlap::{find_overlaps, first_overlap, overlap_error};
use sheetkeep_core::{Field, Row, RowId};
use sheetkeep_storage::WriteDisposition;

use crate::error::EngineError;
use crate::surface::Validity;
use crate::AutosaveEngine;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rows created or updated.
    pub saved: usize,
    /// Creates that folded into an existing record.
    pub duplicates: usize,
    pub errors: usize,
    /// Identified rows with nothing to save.
    pub unchanged: usize,
    /// Non-blank rows still missing required fields.
    pub deferred: usize,
    /// Rows left out because they overlap another row, including creates
    /// the store folded into another row's record.
    pub conflicts: usize,
    pub listed: usize,
    pub deleted: usize,
    pub delete_failures: usize,
}

/// Why a local row was kept as-is instead of replaced by the listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retained {
    Incomplete,
    Conflict(usize),
    Failed,
}

impl AutosaveEngine {
    /// Full flush: save every eligible row, delete persisted rows that are no
    /// longer in the working set, and re-adopt the store's listing. Used on
    /// manual save, navigation and teardown.
    pub async fn flush_all(&mut self) -> Result<ReconcileReport, EngineError> {
        self.row_timers.cancel_all();
        self.batch_timers.cancel_all();
        // Saves already out must land before the listing is read, or a late
        // create would show up as an orphan of its own row.
        self.settle_outstanding().await;

        let dirty: BTreeSet<usize> = self
            .state
            .pending
            .keys()
            .chain(self.state.unsaved.keys())
            .copied()
            .collect();
        self.state.pending.clear();

        let overlaps: BTreeMap<usize, usize> =
            find_overlaps(&self.state.rows, &self.catalog).into_iter().collect();
        let mut report = ReconcileReport::default();
        let mut retained: Vec<(usize, Retained)> = Vec::new();
        let mut keep_ids: BTreeSet<RowId> = BTreeSet::new();
        let mut clobbered: BTreeSet<usize> = BTreeSet::new();
        let mut raised = false;

        for index in 0..self.state.rows.len() {
            let row = self.state.rows[index].clone();

            if !row.is_complete(&self.catalog) {
                if !row.is_blank() {
                    report.deferred += 1;
                }
                keep_ids.extend(row.id);
                retained.push((index, Retained::Incomplete));
                continue;
            }
            if let Some(&blocker) = overlaps.get(&index) {
                report.conflicts += 1;
                keep_ids.extend(row.id);
                retained.push((index, Retained::Conflict(blocker)));
                continue;
            }
            if row.id.is_some() && !dirty.contains(&index) {
                report.unchanged += 1;
                keep_ids.extend(row.id);
                continue;
            }

            self.raise_in_progress(&mut raised);
            let result = match row.id {
                Some(_) => self.store.update(&row).await,
                None => self.store.create(&row).await,
            };
            match result {
                Ok(receipt) => {
                    let holder = receipt.record.id.and_then(|id| self.identity_holder(id, index));
                    if let Some(holder) = holder {
                        warn!(row = index, holder, "flush: store merged row into another row's record");
                        report.conflicts += 1;
                        retained.push((index, Retained::Conflict(holder)));
                        clobbered.insert(holder);
                        continue;
                    }
                    match receipt.disposition {
                        WriteDisposition::Merged => report.duplicates += 1,
                        WriteDisposition::Created | WriteDisposition::Updated => report.saved += 1,
                    }
                    keep_ids.extend(receipt.record.id);
                    self.state.rows[index].id = receipt.record.id;
                }
                Err(e) => {
                    warn!(row = index, error = %e, "flush: save failed");
                    report.errors += 1;
                    keep_ids.extend(row.id);
                    retained.push((index, Retained::Failed));
                }
            }
        }

        // Records another row merged into get their owner's content back.
        for holder in clobbered {
            let row = self.state.rows[holder].clone();
            if !row.is_complete(&self.catalog) {
                warn!(row = holder, "flush: merged-over record left until the row is complete");
                continue;
            }
            if let Err(e) = self.store.update(&row).await {
                warn!(row = holder, error = %e, "flush: restoring merged-over record failed");
                report.errors += 1;
            }
        }

        let listing = match self.store.list_all().await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(error = %e, "flush: listing failed; keeping local rows");
                self.state.unsaved = retained
                    .iter()
                    .filter(|(_, why)| *why == Retained::Failed)
                    .map(|(index, _)| (*index, self.state.rows[*index].clone()))
                    .collect();
                self.update_status();
                return Err(e.into());
            }
        };
        report.listed = listing.len();

        let mut skipped: BTreeSet<RowId> = BTreeSet::new();
        for orphan in listing.iter().filter_map(|r| r.id).filter(|id| !keep_ids.contains(id)) {
            self.raise_in_progress(&mut raised);
            match self.store.delete(orphan).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    warn!(id = %orphan, error = %e, "flush: orphan delete failed");
                    report.delete_failures += 1;
                }
            }
            skipped.insert(orphan);
        }

        self.adopt_listing(listing, &skipped, retained);
        info!(
            saved = report.saved,
            duplicates = report.duplicates,
            errors = report.errors,
            deleted = report.deleted,
            "flush complete"
        );
        Ok(report)
    }

    /// Show `InProgress` once, when the flush issues its first write.
    fn raise_in_progress(&mut self, raised: &mut bool) {
        if !*raised {
            self.cancel_status_hold();
            self.status.on_save_issued(Instant::now());
            *raised = true;
        }
    }

    /// Replace the working set with the listing, substituting or appending
    /// the retained local rows, and reset all tracking state.
    fn adopt_listing(&mut self, listing: Vec<Row>, skipped: &BTreeSet<RowId>, retained: Vec<(usize, Retained)>) {
        let listed_ids: BTreeSet<RowId> = listing.iter().filter_map(|r| r.id).collect();
        let mut local: BTreeMap<RowId, (Row, Retained)> = BTreeMap::new();
        let mut unplaced: Vec<(Row, Retained)> = Vec::new();
        for (index, why) in retained {
            let mut row = self.state.rows[index].clone();
            match row.id {
                Some(id) if listed_ids.contains(&id) => {
                    local.insert(id, (row, why));
                }
                Some(id) => {
                    warn!(id = %id, "flush: record vanished from store; row will be recreated");
                    row.id = None;
                    unplaced.push((row, why));
                }
                None => unplaced.push((row, why)),
            }
        }

        let mut rows: Vec<(Row, Option<Retained>)> = Vec::with_capacity(listing.len() + unplaced.len());
        for record in listing {
            let Some(id) = record.id else {
                continue;
            };
            if skipped.contains(&id) {
                continue;
            }
            match local.remove(&id) {
                Some((row, why)) => rows.push((row, Some(why))),
                None => rows.push((record, None)),
            }
        }
        rows.extend(unplaced.into_iter().map(|(row, why)| (row, Some(why))));

        self.state.pending.clear();
        self.state.in_flight.clear();
        self.state.unsaved.clear();
        self.state.errors.clear();
        self.state.rows = rows.iter().map(|(row, _)| row.clone()).collect();
        self.surface.replace_rows(&self.state.rows);

        // Conflicts are re-flagged against the rows' new positions.
        for (index, (row, why)) in rows.into_iter().enumerate() {
            match why {
                Some(Retained::Failed) => {
                    self.state.unsaved.insert(index, row);
                }
                Some(Retained::Conflict(_)) => {
                    let Some(blocker) = first_overlap(&self.state.rows, &self.catalog, index) else {
                        continue;
                    };
                    let error = overlap_error(index, blocker);
                    self.surface
                        .annotate(index, Field::TimeIn, Validity::Invalid(error.message.clone()));
                    self.state.record_error(error);
                }
                Some(Retained::Incomplete) | None => {}
            }
        }

        self.update_status();
    }
}
