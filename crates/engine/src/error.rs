use sheetkeep_core::CoreError;
use sheetkeep_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("row {index} out of range (working set has {len} rows)")]
    RowOutOfRange { index: usize, len: usize },

    #[error("column {index} out of range")]
    FieldOutOfRange { index: usize },

    #[error("removal of {count} rows at {start} exceeds working set of {len} rows")]
    RemovalOutOfRange { start: usize, count: usize, len: usize },
}
