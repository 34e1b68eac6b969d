use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::field::Field;
use crate::normalize::parse_time_to_minutes;
use crate::row::Row;

/// A field-level problem surfaced to the grid. Presentation only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub row: usize,
    pub field: Field,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerdict {
    /// Put `old_value` back into the cell and mark it invalid. The edit must
    /// not reach the scheduler.
    Revert {
        field: Field,
        old_value: Option<String>,
        error: ValidationError,
    },
    /// The updated row, plus dependent fields that were cleared by cascade.
    Accept { row: Row, cleared: Vec<Field> },
}

impl EditVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept { .. })
    }
}

/// Several cells of one row applied together, as a paste delivers them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowVerdict {
    /// The finished row, with rejected cells back at their old values.
    pub row: Row,
    pub reverted: Vec<ValidationError>,
    pub cleared: Vec<Field>,
}

pub struct FieldValidator<'a> {
    catalog: &'a Catalog,
    time_step: u32,
}

impl<'a> FieldValidator<'a> {
    pub fn new(catalog: &'a Catalog, time_step: u32) -> Self {
        Self {
            catalog,
            time_step: time_step.max(1),
        }
    }

    /// Validate a single cell edit against `row` (the row as it stood before
    /// the edit) and compute cascade resets.
    pub fn check(
        &self,
        row_index: usize,
        field: Field,
        old_value: Option<&str>,
        new_value: Option<&str>,
        row: &Row,
    ) -> EditVerdict {
        let new_value = new_value.map(str::trim).filter(|v| !v.is_empty());

        if let Some(value) = new_value {
            if let Err(message) = self.check_value(field, value, row) {
                return EditVerdict::Revert {
                    field,
                    old_value: old_value.map(str::to_string),
                    error: ValidationError {
                        row: row_index,
                        field,
                        message,
                    },
                };
            }
        }

        let mut updated = row.clone();
        updated.set(field, new_value.map(str::to_string));
        let cleared = self.cascade(&mut updated);
        EditVerdict::Accept {
            row: updated,
            cleared,
        }
    }

    /// Apply every cell in `cells` to `row`, then check each one against the
    /// finished row. A rejected cell goes back to its value in `row`, and the
    /// remaining cells are checked again against that.
    pub fn check_cells(
        &self,
        row_index: usize,
        row: &Row,
        cells: &[(Field, Option<&str>)],
    ) -> RowVerdict {
        let mut updated = row.clone();
        for (field, value) in cells {
            let value = value.map(str::trim).filter(|v| !v.is_empty());
            updated.set(*field, value.map(str::to_string));
        }

        let mut reverted: Vec<ValidationError> = Vec::new();
        loop {
            let mut rejected = None;
            for (field, _) in cells {
                if reverted.iter().any(|e| e.field == *field) {
                    continue;
                }
                let Some(value) = updated.get(*field) else {
                    continue;
                };
                if let Err(message) = self.check_value(*field, value, &updated) {
                    rejected = Some((*field, message));
                    break;
                }
            }
            let Some((field, message)) = rejected else {
                break;
            };
            updated.set(field, row.get(field).map(str::to_string));
            reverted.push(ValidationError {
                row: row_index,
                field,
                message,
            });
        }
        reverted.sort_by_key(|e| e.field.index());

        let cleared = self.cascade(&mut updated);
        RowVerdict {
            row: updated,
            reverted,
            cleared,
        }
    }

    fn check_value(&self, field: Field, value: &str, row: &Row) -> Result<(), String> {
        match field {
            Field::Date => match self.catalog.check_date(value) {
                Some(message) => Err(message),
                None => Ok(()),
            },
            Field::TimeIn => {
                let start = self.check_time(value)?;
                match row.time_out.as_deref().map(parse_time_to_minutes) {
                    Some(Ok(end)) if start >= end => {
                        Err("Time In must be before Time Out".to_string())
                    }
                    _ => Ok(()),
                }
            }
            Field::TimeOut => {
                let end = self.check_time(value)?;
                match row.time_in.as_deref().map(parse_time_to_minutes) {
                    Some(Ok(start)) if end <= start => {
                        Err("Time Out must be after Time In".to_string())
                    }
                    _ => Ok(()),
                }
            }
            Field::Project => {
                if self.catalog.is_project(value) {
                    Ok(())
                } else {
                    Err(format!("Unknown project: {value}"))
                }
            }
            Field::Tool => {
                let project = row
                    .project
                    .as_deref()
                    .ok_or_else(|| "Select a project before choosing a tool".to_string())?;
                if !self.catalog.project_uses_tools(project) {
                    return Err(format!("Project {project} does not use tools"));
                }
                if !self.catalog.tool_allowed(project, value) {
                    return Err(format!("Tool {value} is not available for {project}"));
                }
                Ok(())
            }
            Field::ChargeCode => {
                if !self.catalog.is_charge_code(value) {
                    return Err(format!("Unknown charge code: {value}"));
                }
                match row.tool.as_deref() {
                    Some(tool) if self.catalog.tool_requires_charge_code(tool) => Ok(()),
                    _ => Err("Charge code does not apply to the selected tool".to_string()),
                }
            }
            Field::TaskDescription => Ok(()),
        }
    }

    fn check_time(&self, value: &str) -> Result<u32, String> {
        let minutes = parse_time_to_minutes(value)?;
        if minutes % self.time_step != 0 {
            return Err(format!(
                "Times must be in {}-minute increments",
                self.time_step
            ));
        }
        Ok(minutes)
    }

    /// Null out dependent selectors the governing categories no longer
    /// permit. Returns the cleared fields in column order.
    pub fn cascade(&self, row: &mut Row) -> Vec<Field> {
        let mut cleared = Vec::new();

        if let Some(tool) = row.tool.as_deref() {
            let keep = row
                .project
                .as_deref()
                .is_some_and(|p| self.catalog.tool_allowed(p, tool));
            if !keep {
                row.tool = None;
                cleared.push(Field::Tool);
            }
        }

        if row.charge_code.is_some() {
            let keep = row
                .tool
                .as_deref()
                .is_some_and(|t| self.catalog.tool_requires_charge_code(t));
            if !keep {
                row.charge_code = None;
                cleared.push(Field::ChargeCode);
            }
        }

        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(catalog: &Catalog) -> FieldValidator<'_> {
        FieldValidator::new(catalog, 15)
    }

    fn tooled_row() -> Row {
        Row::blank()
            .with(Field::Date, "2025-01-06")
            .with(Field::TimeIn, "08:00")
            .with(Field::TimeOut, "09:00")
            .with(Field::Project, "FL-Carver Techs")
            .with(Field::Tool, "#1 Rinse and 2D marker")
            .with(Field::ChargeCode, "EPR1")
            .with(Field::TaskDescription, "Wafer rinse")
    }

    #[test]
    fn off_step_time_is_reverted() {
        let catalog = Catalog::default();
        let row = Row::blank().with(Field::TimeIn, "08:00");
        let verdict = validator(&catalog).check(3, Field::TimeIn, Some("08:00"), Some("08:07"), &row);
        match verdict {
            EditVerdict::Revert {
                field,
                old_value,
                error,
            } => {
                assert_eq!(field, Field::TimeIn);
                assert_eq!(old_value.as_deref(), Some("08:00"));
                assert_eq!(error.row, 3);
                assert!(error.message.contains("15-minute"));
            }
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[test]
    fn time_out_must_follow_time_in() {
        let catalog = Catalog::default();
        let row = Row::blank().with(Field::TimeIn, "10:00");
        let verdict = validator(&catalog).check(0, Field::TimeOut, None, Some("09:45"), &row);
        assert!(!verdict.is_accepted());

        let verdict = validator(&catalog).check(0, Field::TimeOut, None, Some("10:15"), &row);
        assert!(verdict.is_accepted());
    }

    #[test]
    fn project_change_clears_tool_and_charge_code() {
        let catalog = Catalog::default();
        let row = tooled_row();
        let verdict = validator(&catalog).check(
            0,
            Field::Project,
            Some("FL-Carver Techs"),
            Some("Internal"),
            &row,
        );
        match verdict {
            EditVerdict::Accept { row, cleared } => {
                assert_eq!(row.project.as_deref(), Some("Internal"));
                assert_eq!(cleared, vec![Field::Tool, Field::ChargeCode]);
                assert!(row.tool.is_none());
                assert!(row.charge_code.is_none());
            }
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn project_change_keeps_tool_still_offered() {
        let catalog = Catalog::default();
        let row = tooled_row();
        let verdict = validator(&catalog).check(
            0,
            Field::Project,
            Some("FL-Carver Techs"),
            Some("OSC-BBB"),
            &row,
        );
        match verdict {
            EditVerdict::Accept { cleared, .. } => assert!(cleared.is_empty()),
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn tool_without_charge_code_clears_it() {
        let catalog = Catalog::default();
        let row = tooled_row();
        let verdict = validator(&catalog).check(
            0,
            Field::Tool,
            Some("#1 Rinse and 2D marker"),
            Some("Meeting"),
            &row,
        );
        match verdict {
            EditVerdict::Accept { row, cleared } => {
                assert_eq!(cleared, vec![Field::ChargeCode]);
                assert_eq!(row.tool.as_deref(), Some("Meeting"));
            }
            other => panic!("expected accept, got {other:?}"),
        }
    }

    #[test]
    fn unknown_selectors_are_rejected() {
        let catalog = Catalog::default();
        let row = tooled_row();
        let v = validator(&catalog);
        assert!(!v.check(0, Field::Project, None, Some("Nope"), &row).is_accepted());
        assert!(!v.check(0, Field::Tool, None, Some("Hammer"), &row).is_accepted());
        assert!(!v.check(0, Field::ChargeCode, None, Some("XYZ"), &row).is_accepted());
        let no_project = Row::blank();
        assert!(!v.check(0, Field::Tool, None, Some("Meeting"), &no_project).is_accepted());
    }

    #[test]
    fn pasted_times_are_checked_against_each_other() {
        let catalog = Catalog::default();
        let row = tooled_row();
        let verdict = validator(&catalog).check_cells(
            0,
            &row,
            &[(Field::TimeIn, Some("10:00")), (Field::TimeOut, Some("11:00"))],
        );
        assert!(verdict.reverted.is_empty());
        assert_eq!(verdict.row.time_in.as_deref(), Some("10:00"));
        assert_eq!(verdict.row.time_out.as_deref(), Some("11:00"));
    }

    #[test]
    fn rejected_cell_rechecks_the_rest() {
        let catalog = Catalog::default();
        let row = tooled_row();
        // 10:07 is off-step, so Time Out falls back to 09:00 and the pasted
        // Time In no longer fits before it.
        let verdict = validator(&catalog).check_cells(
            2,
            &row,
            &[(Field::TimeIn, Some("10:00")), (Field::TimeOut, Some("10:07"))],
        );
        let fields: Vec<Field> = verdict.reverted.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec![Field::TimeIn, Field::TimeOut]);
        assert!(verdict.reverted.iter().all(|e| e.row == 2));
        assert_eq!(verdict.row.time_in.as_deref(), Some("08:00"));
        assert_eq!(verdict.row.time_out.as_deref(), Some("09:00"));
    }

    #[test]
    fn pasted_project_governs_pasted_tool() {
        let catalog = Catalog::default();
        let row = Row::blank().with(Field::Project, "Internal");
        let verdict = validator(&catalog).check_cells(
            0,
            &row,
            &[
                (Field::Project, Some("FL-Carver Techs")),
                (Field::Tool, Some("#1 Rinse and 2D marker")),
                (Field::ChargeCode, Some("EPR1")),
            ],
        );
        assert!(verdict.reverted.is_empty());
        assert!(verdict.cleared.is_empty());
        assert_eq!(verdict.row.charge_code.as_deref(), Some("EPR1"));
    }

    #[test]
    fn clearing_a_cell_is_always_accepted() {
        let catalog = Catalog::default();
        let row = tooled_row();
        let verdict = validator(&catalog).check(0, Field::Date, Some("2025-01-06"), Some(""), &row);
        match verdict {
            EditVerdict::Accept { row, .. } => assert!(row.date.is_none()),
            other => panic!("expected accept, got {other:?}"),
        }
    }
}
