use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::field::Field;
use crate::normalize::canonical;
use crate::row::Row;
use crate::validate::ValidationError;

/// Rows that overlap an earlier, unflagged, complete row on the same date.
/// Returns `(flagged_index, blocking_index)` pairs in working-set order.
pub fn find_overlaps(rows: &[Row], catalog: &Catalog) -> Vec<(usize, usize)> {
    let mut accepted: BTreeMap<String, Vec<(usize, u32, u32)>> = BTreeMap::new();
    let mut flagged = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        if !row.is_complete(catalog) {
            continue;
        }
        let (Some(date), Some((start, end))) = (row.date.as_deref(), row.time_range()) else {
            continue;
        };
        let day = accepted.entry(canonical(Field::Date, date)).or_default();
        match day.iter().find(|(_, s, e)| start < *e && *s < end) {
            Some((blocker, _, _)) => flagged.push((index, *blocker)),
            None => day.push((index, start, end)),
        }
    }

    flagged
}

/// The first other complete row whose range intersects row `index`.
pub fn first_overlap(rows: &[Row], catalog: &Catalog, index: usize) -> Option<usize> {
    let row = rows.get(index)?;
    let date = canonical(Field::Date, row.date.as_deref()?);
    let (start, end) = row.time_range()?;
    rows.iter().enumerate().find_map(|(other, candidate)| {
        if other == index || !candidate.is_complete(catalog) {
            return None;
        }
        let same_day = candidate
            .date
            .as_deref()
            .is_some_and(|d| canonical(Field::Date, d) == date);
        let (s, e) = candidate.time_range()?;
        (same_day && start < e && s < end).then_some(other)
    })
}

const OVERLAP_MESSAGE: &str = "Time range overlaps row";

pub fn overlap_error(index: usize, blocker: usize) -> ValidationError {
    ValidationError {
        row: index,
        field: Field::TimeIn,
        message: format!("{OVERLAP_MESSAGE} {}", blocker + 1),
    }
}

pub fn is_overlap_error(error: &ValidationError) -> bool {
    error.field == Field::TimeIn && error.message.starts_with(OVERLAP_MESSAGE)
}
