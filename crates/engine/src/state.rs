use std::collections::BTreeMap;

use sheetkeep_core::{Field, Row, ValidationError};

use crate::executor::{InFlightSave, SaveToken};
use crate::status::SaveStatus;

/// Everything the engine tracks for one editing session.
#[derive(Debug, Default)]
pub struct SessionState {
    /// The working set, in grid order.
    pub rows: Vec<Row>,
    /// Latest snapshot per row still inside its quiet period.
    pub pending: BTreeMap<usize, Row>,
    /// At most one live save per row.
    pub in_flight: BTreeMap<usize, InFlightSave>,
    /// Rows known to diverge from the store.
    pub unsaved: BTreeMap<usize, Row>,
    pub errors: Vec<ValidationError>,
}

impl SessionState {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn in_flight_index(&self, token: SaveToken) -> Option<usize> {
        self.in_flight
            .iter()
            .find(|(_, save)| save.token == token)
            .map(|(index, _)| *index)
    }

    /// Where the indicator should land once nothing is in flight.
    pub fn settled_status(&self) -> SaveStatus {
        if self.unsaved.is_empty() {
            SaveStatus::Clean
        } else {
            SaveStatus::Dirty
        }
    }

    pub fn record_error(&mut self, error: ValidationError) {
        self.clear_error(error.row, error.field);
        self.errors.push(error);
    }

    pub fn clear_error(&mut self, row: usize, field: Field) {
        self.errors.retain(|e| !(e.row == row && e.field == field));
    }

    /// Drop every index-keyed entry in `start..start + count` and shift the
    /// entries above the range down.
    pub fn remove_range(&mut self, start: usize, count: usize) -> Vec<InFlightSave> {
        remove_and_shift(&mut self.pending, start, count);
        remove_and_shift(&mut self.unsaved, start, count);
        let dropped = remove_and_shift(&mut self.in_flight, start, count);
        let end = start + count;
        self.errors.retain(|e| e.row < start || e.row >= end);
        for error in &mut self.errors {
            if error.row >= end {
                error.row -= count;
            }
        }
        dropped
    }
}

pub(crate) fn remove_and_shift<V>(
    map: &mut BTreeMap<usize, V>,
    start: usize,
    count: usize,
) -> Vec<V> {
    let end = start + count;
    let mut removed = Vec::new();
    for (index, value) in std::mem::take(map) {
        if index < start {
            map.insert(index, value);
        } else if index < end {
            removed.push(value);
        } else {
            map.insert(index - count, value);
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_drops_range_and_rekeys_tail() {
        let mut map: BTreeMap<usize, &str> =
            [(0, "a"), (1, "b"), (2, "c"), (3, "d"), (5, "f")].into_iter().collect();
        let removed = remove_and_shift(&mut map, 1, 2);
        assert_eq!(removed, vec!["b", "c"]);
        let keys: Vec<(usize, &str)> = map.into_iter().collect();
        assert_eq!(keys, vec![(0, "a"), (1, "d"), (3, "f")]);
    }

    #[test]
    fn errors_follow_their_rows() {
        let mut state = SessionState::new(vec![Row::blank(); 4]);
        for row in [0, 1, 3] {
            state.record_error(ValidationError {
                row,
                field: Field::Date,
                message: "bad".into(),
            });
        }
        state.remove_range(1, 1);
        let rows: Vec<usize> = state.errors.iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![0, 2]);
    }

    #[test]
    fn settled_status_reflects_unsaved_rows() {
        let mut state = SessionState::new(vec![Row::blank()]);
        assert_eq!(state.settled_status(), SaveStatus::Clean);
        state.unsaved.insert(0, Row::blank());
        assert_eq!(state.settled_status(), SaveStatus::Dirty);
    }
}
