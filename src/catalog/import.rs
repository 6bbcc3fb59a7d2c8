//! Bulk decision import with newer-wins reconciliation.
//!
//! Rows come from an external CSV and are loosely typed: paths may be
//! relative or absolute, decisions arrive in a loose vocabulary, timestamps
//! may be missing. Every row resolves to exactly one outcome bucket; a bad
//! row never aborts the batch.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use super::data::Decision;
use super::library::Library;
use crate::error::Result;

/// One incoming row. All columns are optional; resolution rules decide
/// what to do with whatever is present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportRow {
    /// Path relative to the dataset root (preferred)
    #[serde(default)]
    pub image_path: Option<String>,
    /// Absolute path; must lie under the dataset root to resolve
    #[serde(default)]
    pub abs_path: Option<String>,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    /// RFC 3339 / ISO timestamp; current time when missing or unparseable
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Per-outcome counts for one import batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub upserted: usize,
    pub cleared: usize,
    pub skipped_missing: usize,
    pub skipped_older: usize,
    pub invalid_decision: usize,
}

impl std::fmt::Display for ImportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} upserted, {} cleared, {} missing, {} older, {} invalid",
            self.upserted, self.cleared, self.skipped_missing, self.skipped_older,
            self.invalid_decision
        )
    }
}

/// What an incoming decision cell means after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecisionInput {
    /// Empty or an explicit "unmarked": clear the stored decision
    Clear,
    Value(Decision),
    /// Not in the vocabulary; the row is counted and skipped
    Unrecognized,
}

/// Normalize loose decision text: case/whitespace-insensitive, with the
/// common synonyms mapped onto the canonical vocabulary.
fn normalize_decision(raw: Option<&str>) -> DecisionInput {
    let v = match raw {
        None => return DecisionInput::Clear,
        Some(s) => s.trim().to_lowercase(),
    };
    match v.as_str() {
        "" | "none" | "null" | "na" | "unmarked" => DecisionInput::Clear,
        "k" | "keep" | "kept" | "keeps" => DecisionInput::Value(Decision::Keep),
        "d" | "discard" | "delete" | "removed" | "drop" => DecisionInput::Value(Decision::Discard),
        "u" | "unsure" | "maybe" | "review" | "revisit" => DecisionInput::Value(Decision::Unsure),
        _ => DecisionInput::Unrecognized,
    }
}

/// Lenient timestamp parse: RFC 3339 first, then a naive ISO form with an
/// optional trailing Z, assumed UTC. `None` when unparseable.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = s.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

/// Resolve a row to a relative path with forward slashes.
///
/// An explicit relative path wins; otherwise the absolute path must start
/// with the dataset root, and the remainder is taken. Purely lexical: no
/// filesystem access, so resolution can fail but never error.
fn resolve_relative(row: &ImportRow, root_dir: &str) -> Option<String> {
    if let Some(rel) = row.image_path.as_deref() {
        let rel = rel.trim();
        if !rel.is_empty() {
            return Some(rel.replace('\\', "/"));
        }
    }

    let abs = row.abs_path.as_deref()?.trim().replace('\\', "/");
    if abs.is_empty() || root_dir.is_empty() {
        return None;
    }
    let root = root_dir.replace('\\', "/");
    let root = root.trim_end_matches('/');
    abs.strip_prefix(&format!("{root}/"))
        .filter(|rel| !rel.is_empty())
        .map(str::to_string)
}

impl Library {
    /// Apply a batch of decision rows against one dataset. See the module
    /// docs for the per-row rules; `prefer_newer` skips rows whose timestamp
    /// is not strictly newer than the stored decision's.
    pub fn import_decision_rows(
        &self,
        dataset_id: i64,
        rows: &[ImportRow],
        root_dir: &str,
        prefer_newer: bool,
    ) -> Result<ImportStats> {
        self.import_decision_rows_at(dataset_id, rows, root_dir, prefer_newer, Utc::now())
    }

    /// `import_decision_rows` with an injected clock for rows that carry no
    /// usable timestamp.
    pub fn import_decision_rows_at(
        &self,
        dataset_id: i64,
        rows: &[ImportRow],
        root_dir: &str,
        prefer_newer: bool,
        now: DateTime<Utc>,
    ) -> Result<ImportStats> {
        let rel_to_id = self.image_path_to_id_map(dataset_id)?;
        // Snapshot of stored decision timestamps, kept current as the batch
        // mutates so later rows reconcile against earlier ones.
        let mut existing = self.existing_decision_timestamps(dataset_id)?;

        let mut stats = ImportStats::default();

        for row in rows {
            let Some(image_id) = resolve_relative(row, root_dir)
                .and_then(|rel| rel_to_id.get(&rel).copied())
            else {
                stats.skipped_missing += 1;
                continue;
            };

            let incoming = normalize_decision(row.decision.as_deref());
            let incoming_ts = row
                .updated_at
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(now);

            if prefer_newer {
                if let Some(Some(stored_ts)) = existing.get(&image_id) {
                    if *stored_ts >= incoming_ts {
                        stats.skipped_older += 1;
                        continue;
                    }
                }
            }

            match incoming {
                DecisionInput::Clear => {
                    self.set_decision_at(image_id, None, None, incoming_ts)?;
                    existing.insert(image_id, None);
                    stats.cleared += 1;
                }
                DecisionInput::Unrecognized => {
                    debug!(image_id, raw = ?row.decision, "unrecognized decision value");
                    stats.invalid_decision += 1;
                }
                DecisionInput::Value(decision) => {
                    let note = row.note.as_deref().filter(|n| !n.trim().is_empty());
                    self.set_decision_at(image_id, Some(decision), note, incoming_ts)?;
                    existing.insert(image_id, Some(incoming_ts));
                    stats.upserted += 1;
                }
            }
        }

        info!(dataset_id, %stats, "decision import finished");
        Ok(stats)
    }

    /// Map: relative image path (forward slashes) → image id.
    fn image_path_to_id_map(&self, dataset_id: i64) -> Result<HashMap<String, i64>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, image_path FROM images WHERE dataset_id = ?1")?;
        let rows = stmt.query_map([dataset_id], |row| {
            Ok((row.get::<_, String>(1)?, row.get::<_, i64>(0)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (path, id) = row?;
            map.insert(path.replace('\\', "/"), id);
        }
        Ok(map)
    }

    /// Map: image id → parsed stored decision timestamp (`None` when the
    /// image is unmarked or its timestamp does not parse).
    fn existing_decision_timestamps(
        &self,
        dataset_id: i64,
    ) -> Result<HashMap<i64, Option<DateTime<Utc>>>> {
        let mut stmt = self.conn().prepare(
            "SELECT i.id, d.updated_at
             FROM images i
             LEFT JOIN decisions d ON d.image_id = i.id
             WHERE i.dataset_id = ?1",
        )?;
        let rows = stmt.query_map([dataset_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (id, ts) = row?;
            map.insert(id, ts.as_deref().and_then(parse_timestamp));
        }
        Ok(map)
    }
}

/// Read import rows from a CSV file. Missing optional columns are fine;
/// a missing file is not.
pub fn read_import_csv(path: impl AsRef<Path>) -> Result<Vec<ImportRow>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(crate::error::Error::CsvNotFound(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::data::{DecisionFilter, ImageQuery};
    use crate::catalog::testutil::{demo_library, image_id};
    use chrono::TimeZone;

    fn row(path: &str, decision: &str, updated_at: &str) -> ImportRow {
        ImportRow {
            image_path: Some(path.to_string()),
            decision: Some(decision.to_string()),
            updated_at: if updated_at.is_empty() {
                None
            } else {
                Some(updated_at.to_string())
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_synonyms_normalize() {
        assert_eq!(normalize_decision(Some("Kept")), DecisionInput::Value(Decision::Keep));
        assert_eq!(normalize_decision(Some(" DROP ")), DecisionInput::Value(Decision::Discard));
        assert_eq!(normalize_decision(Some("revisit")), DecisionInput::Value(Decision::Unsure));
        assert_eq!(normalize_decision(Some("na")), DecisionInput::Clear);
        assert_eq!(normalize_decision(None), DecisionInput::Clear);
        assert_eq!(normalize_decision(Some("banana")), DecisionInput::Unrecognized);
    }

    #[test]
    fn test_timestamp_parsing() {
        assert!(parse_timestamp("2024-01-01T00:00:00Z").is_some());
        assert!(parse_timestamp("2024-01-01T00:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-01-01T00:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_synonym_row_upserts() {
        let (lib, dataset_id) = demo_library();
        let rows = vec![row("a.jpg", "drop", "2024-01-01T00:00:00Z")];
        let stats = lib
            .import_decision_rows(dataset_id, &rows, "/data/demo", true)
            .unwrap();
        assert_eq!(stats.upserted, 1);

        let marked = lib.get_marked(dataset_id, None).unwrap();
        assert_eq!(marked[0].decision, Some(Decision::Discard));
        assert_eq!(marked[0].updated_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_newer_wins_boundary() {
        let (lib, dataset_id) = demo_library();
        let a = image_id(&lib, dataset_id, "a.jpg");
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        lib.set_decision_at(a, Some(Decision::Keep), None, t).unwrap();

        // Equal timestamp: skipped, decision untouched
        let stats = lib
            .import_decision_rows(
                dataset_id,
                &[row("a.jpg", "discard", "2024-03-01T12:00:00Z")],
                "/data/demo",
                true,
            )
            .unwrap();
        assert_eq!(stats.skipped_older, 1);
        assert_eq!(stats.upserted, 0);
        let marked = lib.get_marked(dataset_id, None).unwrap();
        assert_eq!(marked[0].decision, Some(Decision::Keep));

        // Strictly newer: overwrites
        let stats = lib
            .import_decision_rows(
                dataset_id,
                &[row("a.jpg", "discard", "2024-03-01T12:00:01Z")],
                "/data/demo",
                true,
            )
            .unwrap();
        assert_eq!(stats.upserted, 1);
        let marked = lib.get_marked(dataset_id, None).unwrap();
        assert_eq!(marked[0].decision, Some(Decision::Discard));
    }

    #[test]
    fn test_prefer_newer_never_skips_unmarked() {
        let (lib, dataset_id) = demo_library();
        // Ancient timestamp, but no prior decision exists
        let stats = lib
            .import_decision_rows(
                dataset_id,
                &[row("a.jpg", "keep", "1999-01-01T00:00:00Z")],
                "/data/demo",
                true,
            )
            .unwrap();
        assert_eq!(stats.upserted, 1);
        assert_eq!(stats.skipped_older, 0);
    }

    #[test]
    fn test_abs_path_resolution() {
        let (lib, dataset_id) = demo_library();
        let inside = ImportRow {
            abs_path: Some("/data/demo/sub/b.jpg".into()),
            decision: Some("keep".into()),
            ..Default::default()
        };
        let outside = ImportRow {
            abs_path: Some("/other/place/a.jpg".into()),
            decision: Some("keep".into()),
            ..Default::default()
        };
        let stats = lib
            .import_decision_rows(dataset_id, &[inside, outside], "/data/demo", true)
            .unwrap();
        assert_eq!(stats.upserted, 1);
        assert_eq!(stats.skipped_missing, 1);

        let marked = lib.get_marked(dataset_id, None).unwrap();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].image_path, "sub/b.jpg");
    }

    #[test]
    fn test_backslash_paths_resolve() {
        let row = ImportRow {
            abs_path: Some(r"C:\data\demo\sub\b.jpg".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_relative(&row, r"C:\data\demo"),
            Some("sub/b.jpg".to_string())
        );
    }

    #[test]
    fn test_unknown_path_and_decision_buckets() {
        let (lib, dataset_id) = demo_library();
        let rows = vec![
            row("nope.jpg", "keep", ""),
            row("a.jpg", "banana", ""),
            ImportRow::default(),
        ];
        let stats = lib
            .import_decision_rows(dataset_id, &rows, "/data/demo", true)
            .unwrap();
        assert_eq!(stats.skipped_missing, 2);
        assert_eq!(stats.invalid_decision, 1);
        assert_eq!(stats.upserted, 0);
    }

    #[test]
    fn test_clear_row_deletes_decision() {
        let (lib, dataset_id) = demo_library();
        let a = image_id(&lib, dataset_id, "a.jpg");
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        lib.set_decision_at(a, Some(Decision::Keep), None, t).unwrap();

        let stats = lib
            .import_decision_rows(
                dataset_id,
                &[row("a.jpg", "unmarked", "2024-02-01T00:00:00Z")],
                "/data/demo",
                true,
            )
            .unwrap();
        assert_eq!(stats.cleared, 1);
        assert!(lib.get_marked(dataset_id, None).unwrap().is_empty());

        let unmarked = ImageQuery {
            decision_filter: DecisionFilter::Unmarked,
            ..Default::default()
        };
        assert_eq!(lib.query_images(dataset_id, &unmarked).unwrap().1, 3);
    }

    #[test]
    fn test_intra_batch_rows_apply_in_order() {
        let (lib, dataset_id) = demo_library();
        let rows = vec![
            row("a.jpg", "keep", "2024-01-02T00:00:00Z"),
            // Later row, higher timestamp: overwrites the one just applied
            row("a.jpg", "discard", "2024-01-03T00:00:00Z"),
            // Later row, lower timestamp: skipped against the in-batch state
            row("a.jpg", "unsure", "2024-01-01T00:00:00Z"),
        ];
        let stats = lib
            .import_decision_rows(dataset_id, &rows, "/data/demo", true)
            .unwrap();
        assert_eq!(stats.upserted, 2);
        assert_eq!(stats.skipped_older, 1);

        let marked = lib.get_marked(dataset_id, None).unwrap();
        assert_eq!(marked[0].decision, Some(Decision::Discard));
    }

    #[test]
    fn test_empty_note_preserves_existing() {
        let (lib, dataset_id) = demo_library();
        let a = image_id(&lib, dataset_id, "a.jpg");
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        lib.set_decision_at(a, Some(Decision::Keep), Some("good light"), t)
            .unwrap();

        let mut r = row("a.jpg", "keep", "2024-02-01T00:00:00Z");
        r.note = Some("  ".into());
        lib.import_decision_rows(dataset_id, &[r], "/data/demo", true)
            .unwrap();

        let marked = lib.get_marked(dataset_id, None).unwrap();
        assert_eq!(marked[0].note.as_deref(), Some("good light"));
    }
}
