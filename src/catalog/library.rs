use chrono::{SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::data::{Dataset, Decision, ImageQuery, ImageView, NewImage};
use crate::error::Result;

/// Environment variable overriding the catalog database location.
pub const DB_PATH_ENV: &str = "IMAGE_TRIAGE_DB_PATH";

/// Default database filename, relative to the working directory.
pub const DEFAULT_DB_FILE: &str = "image_triage.sqlite";

/// The Library manages the SQLite catalog database.
///
/// It stores the dataset registry, the image catalog, and the decision
/// overlay. All access goes through one connection; every public operation
/// is a single short-lived auto-committed transaction.
pub struct Library {
    conn: Connection,
    db_path: PathBuf,
}

impl Library {
    /// Open the catalog at the configured location: `IMAGE_TRIAGE_DB_PATH`
    /// if set, else `image_triage.sqlite` in the working directory.
    pub fn open_default() -> Result<Self> {
        let path = std::env::var_os(DB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE));
        Self::open(path)
    }

    /// Open (or create) the catalog database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        debug!(path = %db_path.display(), "catalog database opened");

        let library = Library { conn, db_path };
        library.init_schema()?;
        Ok(library)
    }

    /// Open a throwaway in-memory catalog. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let library = Library {
            conn,
            db_path: PathBuf::from(":memory:"),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Initialize the database schema.
    /// Creates all necessary tables and indexes if they don't exist.
    fn init_schema(&self) -> Result<()> {
        // One writer, concurrent readers
        self.conn
            .execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS datasets (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL UNIQUE,
                root_dir    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS images (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id      INTEGER NOT NULL,
                image_name      TEXT NOT NULL,
                image_path      TEXT NOT NULL,
                metadata_json   TEXT NOT NULL,
                UNIQUE(dataset_id, image_path),
                FOREIGN KEY(dataset_id) REFERENCES datasets(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS decisions (
                image_id    INTEGER PRIMARY KEY,
                decision    TEXT NOT NULL CHECK(decision IN ('keep','discard','unsure')),
                note        TEXT,
                updated_at  TEXT NOT NULL,
                FOREIGN KEY(image_id) REFERENCES images(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_images_dataset ON images(dataset_id);
            CREATE INDEX IF NOT EXISTS idx_images_name ON images(image_name);
            CREATE INDEX IF NOT EXISTS idx_images_path ON images(image_path);",
        )?;

        debug!("catalog schema initialized");
        Ok(())
    }

    /// Get the path to the database file
    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Register a dataset by unique name.
    ///
    /// If the name already exists its root directory is overwritten and the
    /// existing id returned; otherwise a new dataset is created. The root
    /// directory is not checked here (the ingestion boundary validates it).
    pub fn register_dataset(&self, name: &str, root_dir: &str) -> Result<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row("SELECT id FROM datasets WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;

        if let Some(id) = existing {
            self.conn.execute(
                "UPDATE datasets SET root_dir = ?1 WHERE id = ?2",
                params![root_dir, id],
            )?;
            debug!(dataset = name, id, "dataset root updated");
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO datasets(name, root_dir, created_at) VALUES (?1, ?2, ?3)",
            params![name, root_dir, now_rfc3339()],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(dataset = name, id, "dataset registered");
        Ok(id)
    }

    /// All datasets, newest-created first.
    pub fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, root_dir, created_at FROM datasets ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Dataset {
                id: row.get(0)?,
                name: row.get(1)?,
                root_dir: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        let mut datasets = Vec::new();
        for dataset in rows {
            datasets.push(dataset?);
        }
        Ok(datasets)
    }

    pub fn get_dataset(&self, dataset_id: i64) -> Result<Option<Dataset>> {
        let dataset = self
            .conn
            .query_row(
                "SELECT id, name, root_dir, created_at FROM datasets WHERE id = ?1",
                [dataset_id],
                |row| {
                    Ok(Dataset {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        root_dir: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(dataset)
    }

    /// Look a dataset up by its unique name.
    pub fn find_dataset(&self, name: &str) -> Result<Option<Dataset>> {
        let dataset = self
            .conn
            .query_row(
                "SELECT id, name, root_dir, created_at FROM datasets WHERE name = ?1",
                [name],
                |row| {
                    Ok(Dataset {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        root_dir: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(dataset)
    }

    /// Insert a batch of images into a dataset.
    ///
    /// A row whose (dataset, relative path) pair already exists is silently
    /// skipped, so re-running an ingest with overlapping input is safe.
    /// Returns the number of rows actually inserted.
    pub fn insert_images(&self, dataset_id: i64, rows: &[NewImage]) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO images(dataset_id, image_name, image_path, metadata_json)
             VALUES (?1, ?2, ?3, ?4)",
        )?;

        let mut inserted = 0;
        for row in rows {
            let metadata_json = serde_json::to_string(&row.metadata)?;
            let changed = stmt.execute(params![
                dataset_id,
                row.image_name,
                row.image_path,
                metadata_json
            ])?;
            if changed > 0 {
                inserted += 1;
            }
        }

        info!(
            dataset_id,
            inserted,
            skipped = rows.len() - inserted,
            "image batch inserted"
        );
        Ok(inserted)
    }

    /// Fetch one page of images plus the total count of images matching the
    /// filter and search (ignoring limit/offset), so the caller can paginate.
    ///
    /// Search text matches case-insensitively as a substring against the
    /// image name, the relative path, or the serialized metadata.
    pub fn query_images(&self, dataset_id: i64, query: &ImageQuery) -> Result<(Vec<ImageView>, u64)> {
        let mut where_sql = String::from("i.dataset_id = ?");
        let mut params: Vec<Value> = vec![Value::Integer(dataset_id)];

        let (clause, bound) = query.decision_filter.sql_clause();
        if let Some(clause) = clause {
            where_sql.push_str(" AND ");
            where_sql.push_str(clause);
        }
        if let Some(value) = bound {
            params.push(Value::Text(value.to_string()));
        }

        if !query.search_text.is_empty() {
            where_sql.push_str(
                " AND (LOWER(i.image_name) LIKE ? OR LOWER(i.image_path) LIKE ? \
                 OR LOWER(i.metadata_json) LIKE ?)",
            );
            let needle = format!("%{}%", query.search_text.to_lowercase());
            for _ in 0..3 {
                params.push(Value::Text(needle.clone()));
            }
        }

        let count_sql = format!(
            "SELECT COUNT(*) FROM images i
             LEFT JOIN decisions d ON d.image_id = i.id
             WHERE {where_sql}"
        );
        let total: u64 = self
            .conn
            .query_row(&count_sql, params_from_iter(params.iter()), |row| {
                row.get(0)
            })?;

        let page_sql = format!(
            "SELECT i.id, i.dataset_id, i.image_name, i.image_path, i.metadata_json,
                    d.decision, d.note, d.updated_at
             FROM images i
             LEFT JOIN decisions d ON d.image_id = i.id
             WHERE {where_sql}
             {}
             LIMIT ? OFFSET ?",
            query.order_by.sql()
        );
        params.push(Value::Integer(i64::from(query.limit)));
        params.push(Value::Integer(i64::from(query.offset)));

        let mut stmt = self.conn.prepare(&page_sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), image_view_from_row)?;

        let mut images = Vec::new();
        for image in rows {
            images.push(image?);
        }
        Ok((images, total))
    }
}

/// Map one joined images+decisions row into an `ImageView`.
///
/// Expected column order: id, dataset_id, image_name, image_path,
/// metadata_json, decision, note, updated_at.
pub(crate) fn image_view_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageView> {
    let decision: Option<String> = row.get(5)?;
    Ok(ImageView {
        id: row.get(0)?,
        dataset_id: row.get(1)?,
        image_name: row.get(2)?,
        image_path: row.get(3)?,
        metadata_json: row.get(4)?,
        decision: decision.and_then(|d| d.parse::<Decision>().ok()),
        note: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Current UTC time as RFC 3339 with second precision, e.g.
/// `2024-01-01T00:00:00Z`. The format stored in `updated_at`/`created_at`.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::data::{DecisionFilter, OrderBy};
    use crate::catalog::testutil::{demo_library, image_id, meta};

    #[test]
    fn test_register_dataset_upserts_by_name() {
        let lib = Library::open_in_memory().unwrap();
        let first = lib.register_dataset("demo", "/old/root").unwrap();
        let second = lib.register_dataset("demo", "/new/root").unwrap();
        assert_eq!(first, second);

        let dataset = lib.get_dataset(first).unwrap().unwrap();
        assert_eq!(dataset.root_dir, "/new/root");
        assert_eq!(lib.list_datasets().unwrap().len(), 1);
    }

    #[test]
    fn test_insert_images_is_idempotent() {
        let (lib, dataset_id) = demo_library();
        let again = vec![NewImage {
            image_name: "a.jpg".into(),
            image_path: "a.jpg".into(),
            metadata: meta(&[]),
        }];
        // Same relative path: skipped, not an error
        assert_eq!(lib.insert_images(dataset_id, &again).unwrap(), 0);

        let (_, total) = lib.query_images(dataset_id, &ImageQuery::default()).unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_query_total_ignores_paging() {
        let (lib, dataset_id) = demo_library();
        let query = ImageQuery {
            limit: 1,
            offset: 1,
            ..Default::default()
        };
        let (page, total) = lib.query_images(dataset_id, &query).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(total, 3);
        assert_eq!(page[0].image_name, "b.jpg");
    }

    #[test]
    fn test_search_matches_name_path_or_metadata() {
        let (lib, dataset_id) = demo_library();
        let by_meta = ImageQuery {
            search_text: "x100".into(),
            ..Default::default()
        };
        let (page, total) = lib.query_images(dataset_id, &by_meta).unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].image_name, "a.jpg");

        let by_path = ImageQuery {
            search_text: "SUB/".into(),
            ..Default::default()
        };
        let (_, total) = lib.query_images(dataset_id, &by_path).unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_order_by_path() {
        let (lib, dataset_id) = demo_library();
        let query = ImageQuery {
            order_by: OrderBy::Path,
            ..Default::default()
        };
        let (page, _) = lib.query_images(dataset_id, &query).unwrap();
        let paths: Vec<&str> = page.iter().map(|i| i.image_path.as_str()).collect();
        assert_eq!(paths, vec!["a.jpg", "c.jpg", "sub/b.jpg"]);
    }

    #[test]
    fn test_filter_partition_covers_all() {
        let (lib, dataset_id) = demo_library();
        lib.set_decision(image_id(&lib, dataset_id, "a.jpg"), Some(Decision::Keep), None)
            .unwrap();

        let total_for = |filter: DecisionFilter| {
            let query = ImageQuery {
                decision_filter: filter,
                ..Default::default()
            };
            lib.query_images(dataset_id, &query).unwrap().1
        };

        let parts = total_for(DecisionFilter::Keep)
            + total_for(DecisionFilter::Discard)
            + total_for(DecisionFilter::Unsure)
            + total_for(DecisionFilter::Unmarked);
        assert_eq!(parts, total_for(DecisionFilter::All));
    }

    #[test]
    fn test_unmarked_counts_track_decisions() {
        let (lib, dataset_id) = demo_library();
        let unmarked = ImageQuery {
            decision_filter: DecisionFilter::Unmarked,
            ..Default::default()
        };
        assert_eq!(lib.query_images(dataset_id, &unmarked).unwrap().1, 3);

        lib.set_decision(image_id(&lib, dataset_id, "a.jpg"), Some(Decision::Keep), None)
            .unwrap();
        assert_eq!(lib.query_images(dataset_id, &unmarked).unwrap().1, 2);

        let keep = ImageQuery {
            decision_filter: DecisionFilter::Keep,
            ..Default::default()
        };
        assert_eq!(lib.query_images(dataset_id, &keep).unwrap().1, 1);
    }
}
