//! Upload parsing, validation and dataset analysis

mod analysis;
mod loader;

pub use analysis::analyze_dataset;
pub use loader::{FileFormat, LoadOptions, TableLoader};
