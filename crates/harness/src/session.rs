use std::sync::Arc;
use std::time::Duration;

use sheetkeep_core::{Catalog, EngineConfig, Field, Row};
use sheetkeep_engine::{AutosaveEngine, CellEdit, EditOutcome, EngineError};

use crate::store::TestStore;
use crate::surface::RecordingSurface;

/// Install a fmt subscriber that writes through the test harness. Safe to
/// call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

/// A complete row on a project without tools.
pub fn timesheet_row(date: &str, time_in: &str, time_out: &str, task: &str) -> Row {
    Row::blank()
        .with(Field::Date, date)
        .with(Field::TimeIn, time_in)
        .with(Field::TimeOut, time_out)
        .with(Field::Project, "Internal")
        .with(Field::TaskDescription, task)
}

/// A row's cells in column order, as a grid paste would deliver them.
pub fn paste_cells(row: &Row) -> Vec<Option<String>> {
    Field::ALL
        .iter()
        .map(|f| row.get(*f).map(str::to_string))
        .collect()
}

pub struct SessionBuilder {
    config: EngineConfig,
    catalog: Catalog,
    seeded: Vec<Row>,
    rows: Option<Vec<Row>>,
    latency: Duration,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            catalog: Catalog::default(),
            seeded: Vec::new(),
            rows: None,
            latency: Duration::from_millis(10),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Records present in the store before the session loads.
    pub fn seed(mut self, rows: impl IntoIterator<Item = Row>) -> Self {
        self.seeded.extend(rows);
        self
    }

    /// Start from these rows instead of the store's listing.
    pub fn rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn build(self) -> Result<TestSession, EngineError> {
        init_tracing();
        let store = Arc::new(TestStore::with_latency(self.latency));
        store.seed(self.seeded);
        let surface = RecordingSurface::new();

        let engine = match self.rows {
            Some(rows) => AutosaveEngine::new(
                store.clone(),
                self.catalog,
                self.config,
                Box::new(surface.clone()),
                rows,
            ),
            None => {
                let engine = AutosaveEngine::load(
                    store.clone(),
                    self.catalog,
                    self.config,
                    Box::new(surface.clone()),
                )
                .await?;
                store.clear_calls();
                engine
            }
        };

        Ok(TestSession {
            engine,
            store,
            surface,
        })
    }
}

pub struct TestSession {
    pub engine: AutosaveEngine,
    pub store: Arc<TestStore>,
    pub surface: RecordingSurface,
}

impl TestSession {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Type `value` into a cell, as the grid would report it.
    pub fn edit(&mut self, row: usize, field: Field, value: &str) -> Result<EditOutcome, EngineError> {
        let old = self.engine.row(row).and_then(|r| r.get(field)).map(str::to_string);
        self.engine
            .apply_edit(CellEdit::new(row, field, old.as_deref(), Some(value)))
    }

    pub fn clear(&mut self, row: usize, field: Field) -> Result<EditOutcome, EngineError> {
        let old = self.engine.row(row).and_then(|r| r.get(field)).map(str::to_string);
        self.engine
            .apply_edit(CellEdit::new(row, field, old.as_deref(), None))
    }

    /// Fill every non-empty cell of `row` into the grid row at `index`, one
    /// edit per cell in column order.
    pub fn type_row(&mut self, index: usize, row: &Row) -> Result<(), EngineError> {
        for field in Field::ALL {
            if let Some(value) = row.get(field) {
                self.edit(index, field, value)?;
            }
        }
        Ok(())
    }

    /// Pump events until the row has a save out.
    pub async fn until_in_flight(&mut self, row: usize) {
        while !self.engine.in_flight_rows().contains(&row) {
            if !self.engine.process_next().await {
                break;
            }
        }
    }
}
