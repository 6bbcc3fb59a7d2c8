//! image-triage: a local image-review catalog.
//!
//! Datasets are ingested from CSV (a root directory plus per-image metadata),
//! reviewed with keep/discard/unsure decisions, and exported back to CSV.
//! Decision CSVs can be re-imported with newer-wins reconciliation.
//!
//! The [`catalog`] module is the complete data-access contract; front ends
//! (the bundled CLI, any future UI) hold no state of their own.

pub mod catalog;
pub mod error;
pub mod ingest;

pub use catalog::data::{
    Dataset, Decision, DecisionFilter, ImageQuery, ImageView, NewImage, OrderBy,
};
pub use catalog::export::{write_export_csv, ExportRow};
pub use catalog::import::{read_import_csv, ImportRow, ImportStats};
pub use catalog::library::Library;
pub use error::{Error, Result};
