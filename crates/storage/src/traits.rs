use async_trait::async_trait;
use sheetkeep_core::{Row, RowId};

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    Created,
    Updated,
    /// A create landed on an existing record with the same natural key.
    Merged,
}

impl WriteDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Merged => "merged",
        }
    }
}

/// The canonical stored record returned by a successful write, including
/// the assigned identity and any normalisation the store applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub record: Row,
    pub disposition: WriteDisposition,
}

/// Persistence collaborator for the autosave engine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, row: &Row) -> Result<Receipt, StorageError>;

    async fn update(&self, row: &Row) -> Result<Receipt, StorageError>;

    async fn delete(&self, id: RowId) -> Result<(), StorageError>;

    async fn list_all(&self) -> Result<Vec<Row>, StorageError>;
}
