pub mod catalog;
pub mod config;
pub mod error;
pub mod field;
pub mod ids;
pub mod normalize;
pub mod overlap;
pub mod row;
pub mod validate;

pub use catalog::Catalog;
pub use config::EngineConfig;
pub use error::CoreError;
pub use field::Field;
pub use ids::RowId;
pub use row::Row;
pub use validate::{EditVerdict, FieldValidator, RowVerdict, ValidationError};
