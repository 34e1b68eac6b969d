mod session;
mod store;
mod surface;

pub use session::{SessionBuilder, TestSession, init_tracing, paste_cells, timesheet_row};
pub use store::{StoreCall, TestStore};
pub use surface::{RecordingSurface, SurfaceEvent};
