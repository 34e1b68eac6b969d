use std::sync::{Arc, Mutex};

use sheetkeep_core::{Field, Row};
use sheetkeep_engine::{EditSurface, Validity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    Write {
        row: usize,
        field: Field,
        value: Option<String>,
    },
    Annotate {
        row: usize,
        field: Field,
        validity: Validity,
    },
    Replace {
        rows: usize,
    },
}

/// Editing surface that records every callback. Clones share one log, so
/// the test keeps a handle while the engine owns another.
#[derive(Clone, Default)]
pub struct RecordingSurface {
    log: Arc<Mutex<Vec<SurfaceEvent>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: SurfaceEvent) {
        if let Ok(mut log) = self.log.lock() {
            log.push(event);
        }
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }

    /// Programmatic writes, as `(row, field, value)`.
    pub fn writes(&self) -> Vec<(usize, Field, Option<String>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SurfaceEvent::Write { row, field, value } => Some((row, field, value)),
                _ => None,
            })
            .collect()
    }

    /// The latest validity mark for a cell.
    pub fn validity(&self, row: usize, field: Field) -> Option<Validity> {
        self.events().into_iter().rev().find_map(|e| match e {
            SurfaceEvent::Annotate {
                row: r,
                field: f,
                validity,
            } if r == row && f == field => Some(validity),
            _ => None,
        })
    }
}

impl EditSurface for RecordingSurface {
    fn write_field(&mut self, row: usize, field: Field, value: Option<&str>) {
        self.push(SurfaceEvent::Write {
            row,
            field,
            value: value.map(str::to_string),
        });
    }

    fn annotate(&mut self, row: usize, field: Field, validity: Validity) {
        self.push(SurfaceEvent::Annotate {
            row,
            field,
            validity,
        });
    }

    fn replace_rows(&mut self, rows: &[Row]) {
        self.push(SurfaceEvent::Replace { rows: rows.len() });
    }
}
