//! Decision overlay: at most one keep/discard/unsure verdict per image.
//!
//! "Unmarked" is the absence of a decisions row, never a stored null;
//! clearing always deletes the row.

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::debug;

use super::data::{Decision, ImageView};
use super::library::{image_view_from_row, Library};
use crate::error::Result;

impl Library {
    /// Record or clear the decision for one image.
    ///
    /// `None` deletes the decision row (a no-op when none exists). Otherwise
    /// the decision is upserted: value and timestamp are always overwritten,
    /// but an existing note survives unless a new note is supplied.
    pub fn set_decision(
        &self,
        image_id: i64,
        decision: Option<Decision>,
        note: Option<&str>,
    ) -> Result<()> {
        self.set_decision_at(image_id, decision, note, Utc::now())
    }

    /// `set_decision` with an explicit timestamp, so callers with their own
    /// clock (bulk import, tests) stay deterministic.
    pub fn set_decision_at(
        &self,
        image_id: i64,
        decision: Option<Decision>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match decision {
            None => {
                self.conn()
                    .execute("DELETE FROM decisions WHERE image_id = ?1", [image_id])?;
                debug!(image_id, "decision cleared");
            }
            Some(decision) => {
                self.conn().execute(
                    "INSERT INTO decisions(image_id, decision, note, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(image_id) DO UPDATE SET
                         decision = excluded.decision,
                         note = COALESCE(excluded.note, decisions.note),
                         updated_at = excluded.updated_at",
                    params![
                        image_id,
                        decision.as_str(),
                        note,
                        now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                    ],
                )?;
                debug!(image_id, decision = decision.as_str(), "decision recorded");
            }
        }
        Ok(())
    }

    /// All decided images of a dataset, most recently updated first,
    /// optionally restricted to one decision value.
    pub fn get_marked(&self, dataset_id: i64, decision: Option<Decision>) -> Result<Vec<ImageView>> {
        let base = "SELECT i.id, i.dataset_id, i.image_name, i.image_path, i.metadata_json,
                           d.decision, d.note, d.updated_at
                    FROM images i
                    JOIN decisions d ON d.image_id = i.id
                    WHERE i.dataset_id = ?1";

        let mut images = Vec::new();
        match decision {
            Some(decision) => {
                let sql = format!("{base} AND d.decision = ?2 ORDER BY d.updated_at DESC");
                let mut stmt = self.conn().prepare(&sql)?;
                let rows =
                    stmt.query_map(params![dataset_id, decision.as_str()], image_view_from_row)?;
                for image in rows {
                    images.push(image?);
                }
            }
            None => {
                let sql = format!("{base} ORDER BY d.updated_at DESC");
                let mut stmt = self.conn().prepare(&sql)?;
                let rows = stmt.query_map([dataset_id], image_view_from_row)?;
                for image in rows {
                    images.push(image?);
                }
            }
        }
        Ok(images)
    }
}
