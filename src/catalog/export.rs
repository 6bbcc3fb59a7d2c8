//! Flatten dataset + image + decision into exportable CSV rows.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::library::{image_view_from_row, Library};
use crate::error::{Error, Result};

/// One export row. String-typed throughout: unmarked images carry empty
/// decision/note/timestamp cells, not nulls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub dataset_name: String,
    pub root_dir: String,
    pub image_name: String,
    pub image_path: String,
    /// Root and relative path joined as plain concatenation
    pub abs_path: String,
    pub decision: String,
    pub note: String,
    pub updated_at: String,
    pub metadata_json: String,
}

impl Library {
    /// All images of a dataset flattened with their decision state.
    /// With `include_unmarked` false, undecided images are omitted entirely.
    pub fn export_rows(&self, dataset_id: i64, include_unmarked: bool) -> Result<Vec<ExportRow>> {
        let dataset = self
            .get_dataset(dataset_id)?
            .ok_or_else(|| Error::DatasetNotFound(format!("id {dataset_id}")))?;

        let mut stmt = self.conn().prepare(
            "SELECT i.id, i.dataset_id, i.image_name, i.image_path, i.metadata_json,
                    d.decision, d.note, d.updated_at
             FROM images i
             LEFT JOIN decisions d ON d.image_id = i.id
             WHERE i.dataset_id = ?1
             ORDER BY i.image_path",
        )?;
        let views = stmt.query_map([dataset_id], image_view_from_row)?;

        let root = dataset.root_dir.trim_end_matches('/').to_string();
        let mut rows = Vec::new();
        for view in views {
            let view = view?;
            if view.decision.is_none() && !include_unmarked {
                continue;
            }
            rows.push(ExportRow {
                dataset_name: dataset.name.clone(),
                root_dir: dataset.root_dir.clone(),
                image_name: view.image_name,
                abs_path: format!("{root}/{}", view.image_path),
                image_path: view.image_path,
                decision: view.decision.map(|d| d.to_string()).unwrap_or_default(),
                note: view.note.unwrap_or_default(),
                updated_at: view.updated_at.unwrap_or_default(),
                metadata_json: view.metadata_json,
            });
        }
        Ok(rows)
    }
}

/// Write export rows to a CSV file, header included.
pub fn write_export_csv(path: impl AsRef<Path>, rows: &[ExportRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
