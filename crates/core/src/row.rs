use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::field::Field;
use crate::ids::RowId;
use crate::normalize::{canonical_cell, parse_time_to_minutes};

/// One timesheet entry as held in the working set. Cells keep the text the
/// user typed; `None` is an empty cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: Option<RowId>,
    pub date: Option<String>,
    pub time_in: Option<String>,
    pub time_out: Option<String>,
    pub project: Option<String>,
    pub tool: Option<String>,
    pub charge_code: Option<String>,
    pub task_description: Option<String>,
}

impl Row {
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        let cell = match field {
            Field::Date => &self.date,
            Field::TimeIn => &self.time_in,
            Field::TimeOut => &self.time_out,
            Field::Project => &self.project,
            Field::Tool => &self.tool,
            Field::ChargeCode => &self.charge_code,
            Field::TaskDescription => &self.task_description,
        };
        cell.as_deref()
    }

    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::Date => &mut self.date,
            Field::TimeIn => &mut self.time_in,
            Field::TimeOut => &mut self.time_out,
            Field::Project => &mut self.project,
            Field::Tool => &mut self.tool,
            Field::ChargeCode => &mut self.charge_code,
            Field::TaskDescription => &mut self.task_description,
        }
    }

    /// Set a cell; empty or whitespace-only text clears it.
    pub fn set(&mut self, field: Field, value: Option<String>) {
        *self.slot(field) = value.filter(|v| !v.trim().is_empty());
    }

    pub fn with(mut self, field: Field, value: &str) -> Self {
        self.set(field, Some(value.to_string()));
        self
    }

    pub fn is_blank(&self) -> bool {
        Field::ALL.iter().all(|f| self.get(*f).is_none())
    }

    pub fn has(&self, field: Field) -> bool {
        self.get(field).is_some()
    }

    /// Fields that must be filled before the row can be persisted.
    pub fn required_fields(&self, catalog: &Catalog) -> Vec<Field> {
        let mut required = vec![
            Field::Date,
            Field::TimeIn,
            Field::TimeOut,
            Field::Project,
            Field::TaskDescription,
        ];
        if let Some(project) = self.project.as_deref() {
            if catalog.project_uses_tools(project) {
                required.push(Field::Tool);
            }
        }
        if let Some(tool) = self.tool.as_deref() {
            if catalog.tool_requires_charge_code(tool) {
                required.push(Field::ChargeCode);
            }
        }
        required
    }

    pub fn missing_fields(&self, catalog: &Catalog) -> Vec<Field> {
        self.required_fields(catalog)
            .into_iter()
            .filter(|f| !self.has(*f))
            .collect()
    }

    pub fn is_complete(&self, catalog: &Catalog) -> bool {
        self.missing_fields(catalog).is_empty()
    }

    /// `[time_in, time_out)` in minutes, when both cells parse.
    pub fn time_range(&self) -> Option<(u32, u32)> {
        let start = parse_time_to_minutes(self.time_in.as_deref()?).ok()?;
        let end = parse_time_to_minutes(self.time_out.as_deref()?).ok()?;
        Some((start, end))
    }

    /// Copy of this row with every cell in its stored form.
    pub fn normalized(&self) -> Row {
        let mut out = Row {
            id: self.id,
            ..Row::default()
        };
        for field in Field::ALL {
            *out.slot(field) = canonical_cell(field, self.get(field));
        }
        out
    }

    /// Cell-by-cell comparison on stored forms, ignoring identity.
    pub fn same_content(&self, other: &Row) -> bool {
        Field::ALL.iter().all(|f| {
            canonical_cell(*f, self.get(*f)) == canonical_cell(*f, other.get(*f))
        })
    }

    /// Whether a store receipt confirms this row. Identity only has to agree
    /// once the row already carries one.
    pub fn matches_receipt(&self, receipt: &Row) -> bool {
        let identity_agrees = match self.id {
            Some(id) => receipt.id == Some(id),
            None => true,
        };
        identity_agrees && self.same_content(receipt)
    }

    /// Cells whose text differs from `other` (raw comparison, used for
    /// write-back after normalisation).
    pub fn differing_fields(&self, other: &Row) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|f| self.get(*f) != other.get(*f))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Row {
        Row::blank()
            .with(Field::Date, "01/06/2025")
            .with(Field::TimeIn, "9:00")
            .with(Field::TimeOut, "10:30")
            .with(Field::Project, "Internal")
            .with(Field::TaskDescription, "Planning")
    }

    #[test]
    fn set_clears_whitespace() {
        let mut row = Row::blank();
        row.set(Field::Project, Some("  ".into()));
        assert!(row.project.is_none());
        assert!(row.is_blank());
    }

    #[test]
    fn completeness_follows_catalog_rules() {
        let catalog = Catalog::default();
        let row = complete();
        assert!(row.is_complete(&catalog));

        let tooled = complete().with(Field::Project, "FL-Carver Techs");
        assert_eq!(tooled.missing_fields(&catalog), vec![Field::Tool]);

        let coded = tooled.with(Field::Tool, "#1 Rinse and 2D marker");
        assert_eq!(coded.missing_fields(&catalog), vec![Field::ChargeCode]);
    }

    #[test]
    fn receipt_comparison_uses_stored_forms() {
        let row = complete();
        let mut receipt = row.normalized();
        receipt.id = Some(RowId::new());
        assert!(row.matches_receipt(&receipt));
        assert_eq!(receipt.date.as_deref(), Some("2025-01-06"));

        let edited = row.clone().with(Field::TaskDescription, "Review");
        assert!(!edited.matches_receipt(&receipt));
    }

    #[test]
    fn receipt_for_other_identity_does_not_match() {
        let mut row = complete();
        row.id = Some(RowId::new());
        let mut receipt = row.normalized();
        receipt.id = Some(RowId::new());
        assert!(!row.matches_receipt(&receipt));
    }
}
