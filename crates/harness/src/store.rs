use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use sheetkeep_core::{Field, Row, RowId};
use sheetkeep_storage::{Receipt, RecordStore, StorageError, WriteDisposition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create(Row),
    Update(Row),
    Delete(RowId),
    List,
}

#[derive(Default)]
struct StoreState {
    records: Vec<Row>,
    calls: Vec<StoreCall>,
    latency: Duration,
    scripted: VecDeque<Duration>,
    rejected_task: Option<String>,
    fail_listing: bool,
    fail_deletes: bool,
}

/// In-memory record store with scriptable latency and failure injection.
///
/// Writes are applied when the call arrives and the response is delayed by
/// the latency, so the store sees writes in issue order the way a single
/// connection would.
#[derive(Default)]
pub struct TestStore {
    state: Mutex<StoreState>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        let store = Self::new();
        store.set_latency(latency);
        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StorageError> {
        self.state.lock().map_err(|_| StorageError::Poisoned)
    }

    // Test-side accessors panic on a poisoned lock; only the trait methods
    // report it as an error.
    fn inspect(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().expect("test store lock poisoned")
    }

    pub fn set_latency(&self, latency: Duration) {
        self.inspect().latency = latency;
    }

    /// Latencies for the next calls, in order, before falling back to the
    /// fixed latency.
    pub fn script_latencies(&self, latencies: impl IntoIterator<Item = Duration>) {
        self.inspect().scripted.extend(latencies);
    }

    /// Reject creates and updates whose task description is `task`.
    pub fn reject_task(&self, task: &str) {
        self.inspect().rejected_task = Some(task.to_string());
    }

    pub fn accept_all(&self) {
        let mut state = self.inspect();
        state.rejected_task = None;
        state.fail_listing = false;
        state.fail_deletes = false;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.inspect().fail_listing = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.inspect().fail_deletes = fail;
    }

    /// Insert records directly, bypassing the call log. Returns them with
    /// their assigned identities.
    pub fn seed(&self, rows: impl IntoIterator<Item = Row>) -> Vec<Row> {
        let mut state = self.inspect();
        rows.into_iter()
            .map(|row| {
                let mut record = row.normalized();
                record.id = Some(RowId::new());
                state.records.push(record.clone());
                record
            })
            .collect()
    }

    pub fn records(&self) -> Vec<Row> {
        sorted(self.inspect().records.clone())
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.inspect().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inspect().calls.clear();
    }

    fn count(&self, pred: impl Fn(&StoreCall) -> bool) -> usize {
        self.inspect().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Create(_)))
    }

    pub fn updates(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Update(_)))
    }

    pub fn writes(&self) -> usize {
        self.creates() + self.updates()
    }

    pub fn deletes(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Delete(_)))
    }

    pub fn lists(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::List))
    }

    /// Log the call, run `apply` against the records, and hand back the
    /// result along with the delay to wait before answering.
    fn call<T>(
        &self,
        call: StoreCall,
        apply: impl FnOnce(&mut StoreState) -> Result<T, StorageError>,
    ) -> Result<(Result<T, StorageError>, Duration), StorageError> {
        let mut state = self.lock()?;
        state.calls.push(call);
        let delay = state.scripted.pop_front().unwrap_or(state.latency);
        Ok((apply(&mut *state), delay))
    }

    async fn respond<T>(
        &self,
        call: StoreCall,
        apply: impl FnOnce(&mut StoreState) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let (result, delay) = self.call(call, apply)?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}

fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by(|a, b| (&a.date, &a.time_in).cmp(&(&b.date, &b.time_in)));
    rows
}

fn check_writable(state: &StoreState, row: &Row) -> Result<(), StorageError> {
    if let Some(task) = &state.rejected_task
        && row.get(Field::TaskDescription) == Some(task.as_str())
    {
        return Err(StorageError::Rejected(format!("task {task:?} rejected")));
    }
    Ok(())
}

fn natural_key(row: &Row) -> (Option<&str>, Option<&str>, Option<&str>, Option<&str>) {
    (
        row.get(Field::Date),
        row.get(Field::TimeIn),
        row.get(Field::Project),
        row.get(Field::TaskDescription),
    )
}

#[async_trait]
impl RecordStore for TestStore {
    async fn create(&self, row: &Row) -> Result<Receipt, StorageError> {
        self.respond(StoreCall::Create(row.clone()), |state| {
            check_writable(state, row)?;
            let mut record = row.normalized();
            let existing = state
                .records
                .iter_mut()
                .find(|r| natural_key(r) == natural_key(&record));
            match existing {
                Some(found) => {
                    record.id = found.id;
                    *found = record.clone();
                    Ok(Receipt {
                        record,
                        disposition: WriteDisposition::Merged,
                    })
                }
                None => {
                    record.id = Some(RowId::new());
                    state.records.push(record.clone());
                    Ok(Receipt {
                        record,
                        disposition: WriteDisposition::Created,
                    })
                }
            }
        })
        .await
    }

    async fn update(&self, row: &Row) -> Result<Receipt, StorageError> {
        self.respond(StoreCall::Update(row.clone()), |state| {
            check_writable(state, row)?;
            let id = row
                .id
                .ok_or_else(|| StorageError::Rejected("update without identity".into()))?;
            let record = row.normalized();
            let slot = state
                .records
                .iter_mut()
                .find(|r| r.id == Some(id))
                .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
            *slot = record.clone();
            Ok(Receipt {
                record,
                disposition: WriteDisposition::Updated,
            })
        })
        .await
    }

    async fn delete(&self, id: RowId) -> Result<(), StorageError> {
        self.respond(StoreCall::Delete(id), |state| {
            if state.fail_deletes {
                return Err(StorageError::Rejected("delete refused".into()));
            }
            let before = state.records.len();
            state.records.retain(|r| r.id != Some(id));
            if state.records.len() == before {
                return Err(StorageError::NotFound(id.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<Row>, StorageError> {
        self.respond(StoreCall::List, |state| {
            if state.fail_listing {
                return Err(StorageError::Rejected("listing unavailable".into()));
            }
            Ok(sorted(state.records.clone()))
        })
        .await
    }
}
