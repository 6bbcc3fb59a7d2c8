//! CSV ingestion boundary.
//!
//! Reads a metadata CSV describing one dataset and loads it into the
//! catalog. This layer fails fast: a missing root directory, a missing CSV
//! file, or an absent required column aborts before anything is written.
//! Re-running an ingest is safe; already-cataloged paths are skipped.

use serde_json::Value;
use std::path::Path;
use tracing::info;

use crate::catalog::data::NewImage;
use crate::catalog::library::Library;
use crate::error::{Error, Result};

/// Columns every ingest CSV must carry. Everything else becomes metadata.
pub const REQUIRED_COLUMNS: &[&str] = &["image_name", "image_path"];

/// Outcome of one ingest run.
#[derive(Debug, Clone, Copy)]
pub struct IngestReport {
    pub dataset_id: i64,
    /// Rows read from the CSV
    pub total_rows: usize,
    /// Rows actually inserted (the rest were already cataloged)
    pub inserted: usize,
}

/// Parse an ingest CSV into image rows.
///
/// Required columns must be present in the header. Every other column is
/// stored as a metadata key; an empty cell becomes JSON null rather than an
/// empty string, so absence stays distinguishable downstream.
pub fn read_ingest_csv(csv_path: impl AsRef<Path>) -> Result<Vec<NewImage>> {
    let csv_path = csv_path.as_ref();
    if !csv_path.is_file() {
        return Err(Error::CsvNotFound(csv_path.to_path_buf()));
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let headers = reader.headers()?.clone();

    let column = |name: &str| -> Result<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| Error::MissingColumn(name.to_string()))
    };
    let name_idx = column("image_name")?;
    let path_idx = column("image_path")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut metadata = serde_json::Map::new();
        for (idx, header) in headers.iter().enumerate() {
            if idx == name_idx || idx == path_idx {
                continue;
            }
            let cell = record.get(idx).unwrap_or("");
            let value = if cell.is_empty() {
                Value::Null
            } else {
                Value::String(cell.to_string())
            };
            metadata.insert(header.to_string(), value);
        }
        rows.push(NewImage {
            image_name: record.get(name_idx).unwrap_or("").to_string(),
            image_path: record.get(path_idx).unwrap_or("").to_string(),
            metadata,
        });
    }
    Ok(rows)
}

/// Ingest one dataset: validate the root directory and CSV, register the
/// dataset under `name` (re-registering overwrites the stored root), and
/// insert the images idempotently.
pub fn ingest(
    library: &Library,
    name: &str,
    root_dir: impl AsRef<Path>,
    csv_path: impl AsRef<Path>,
) -> Result<IngestReport> {
    let root_dir = root_dir.as_ref();
    if !root_dir.is_dir() {
        return Err(Error::RootDirMissing(root_dir.to_path_buf()));
    }

    let rows = read_ingest_csv(csv_path)?;

    let root_abs = std::path::absolute(root_dir)?;
    let dataset_id = library.register_dataset(name, &root_abs.to_string_lossy())?;
    let inserted = library.insert_images(dataset_id, &rows)?;

    info!(dataset = name, dataset_id, inserted, total = rows.len(), "ingest complete");
    Ok(IngestReport {
        dataset_id,
        total_rows: rows.len(),
        inserted,
    })
}
