use sheetkeep_core::RowId;
use sheetkeep_storage::{Receipt, StorageError};

use crate::executor::SaveToken;
use crate::scheduler::TimerId;

/// Completions reported back to the engine by its spawned timers and
/// persistence calls. Every state mutation happens while handling one of
/// these, on the task that owns the engine.
#[derive(Debug)]
pub(crate) enum EngineEvent {
    QuietPeriodElapsed {
        timer: TimerId,
    },
    BatchWindowElapsed {
        timer: TimerId,
    },
    SaveSettled {
        token: SaveToken,
        result: Result<Receipt, StorageError>,
    },
    DeleteSettled {
        id: RowId,
        result: Result<(), StorageError>,
    },
    StatusHoldElapsed {
        timer: TimerId,
    },
}
