use sheetkeep_core::{Field, Row};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid(String),
}

/// Callbacks into the editing grid. The engine never renders anything; it
/// only pushes values and validity marks back through this trait.
pub trait EditSurface: Send {
    /// Programmatic cell write (reverts, cascade clears, store normalisation).
    fn write_field(&mut self, row: usize, field: Field, value: Option<&str>);

    fn annotate(&mut self, row: usize, field: Field, validity: Validity);

    /// The working set was replaced wholesale by a full reconciliation.
    fn replace_rows(&mut self, _rows: &[Row]) {}
}

/// Surface for headless sessions.
pub struct NullSurface;

impl EditSurface for NullSurface {
    fn write_field(&mut self, _row: usize, _field: Field, _value: Option<&str>) {}

    fn annotate(&mut self, _row: usize, _field: Field, _validity: Validity) {}
}
