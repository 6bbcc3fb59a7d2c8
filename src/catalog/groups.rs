//! Two-level archetype → location-category grouping, derived on demand from
//! each image's metadata payload. Nothing here is persisted.
//!
//! Both logical fields have accumulated alternate key names across dataset
//! generations. Each is an ordered candidate list evaluated first-match-wins;
//! adding a new historical key means appending to the list, nothing else.

use rusqlite::{params_from_iter, types::Value};
use std::collections::BTreeMap;

use super::data::{DecisionFilter, ImageView, OrderBy};
use super::library::{image_view_from_row, Library};
use crate::error::Result;

/// Candidate metadata keys for the archetype field, newest naming first.
pub const ARCHETYPE_KEYS: &[&str] = &[
    "unique_context_archetype",
    "gt_context_archetype",
    "gt_context_archetypes",
];

/// Candidate metadata keys for the location-category field.
pub const CATEGORY_KEYS: &[&str] = &[
    "gt_location_category",
    "location_category",
    "gt_location",
];

/// SQL expression picking the first present candidate key out of the
/// metadata payload.
fn json_field_expr(keys: &[&str], column: &str) -> String {
    let extracts: Vec<String> = keys
        .iter()
        .map(|k| format!("json_extract({column}, '$.{k}')"))
        .collect();
    format!("COALESCE({})", extracts.join(", "))
}

impl Library {
    /// Archetype → sorted distinct categories, over images that have both
    /// fields. Images lacking either field do not appear.
    pub fn group_tree(&self, dataset_id: i64) -> Result<BTreeMap<String, Vec<String>>> {
        let arch = json_field_expr(ARCHETYPE_KEYS, "metadata_json");
        let cat = json_field_expr(CATEGORY_KEYS, "metadata_json");
        let sql = format!(
            "SELECT DISTINCT CAST({arch} AS TEXT), CAST({cat} AS TEXT)
             FROM images
             WHERE dataset_id = ?1 AND {arch} IS NOT NULL AND {cat} IS NOT NULL
             ORDER BY 1, 2"
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map([dataset_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut tree: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in rows {
            let (archetype, category) = row?;
            tree.entry(archetype).or_default().push(category);
        }
        Ok(tree)
    }

    /// Count images in one (archetype, category) group, with the same
    /// decision-filter semantics as `query_images`.
    pub fn count_in_group(
        &self,
        dataset_id: i64,
        archetype: &str,
        category: &str,
        filter: DecisionFilter,
    ) -> Result<u64> {
        let (where_sql, params) = group_where(dataset_id, archetype, category, filter);
        let sql = format!(
            "SELECT COUNT(*)
             FROM images i
             LEFT JOIN decisions d ON d.image_id = i.id
             WHERE {where_sql}"
        );
        let count = self
            .conn()
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count)
    }

    /// One page of images in one (archetype, category) group.
    #[allow(clippy::too_many_arguments)]
    pub fn list_in_group(
        &self,
        dataset_id: i64,
        archetype: &str,
        category: &str,
        filter: DecisionFilter,
        order_by: OrderBy,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ImageView>> {
        let (where_sql, mut params) = group_where(dataset_id, archetype, category, filter);
        let sql = format!(
            "SELECT i.id, i.dataset_id, i.image_name, i.image_path, i.metadata_json,
                    d.decision, d.note, d.updated_at
             FROM images i
             LEFT JOIN decisions d ON d.image_id = i.id
             WHERE {where_sql}
             {}
             LIMIT ? OFFSET ?",
            order_by.sql()
        );
        params.push(Value::Integer(i64::from(limit)));
        params.push(Value::Integer(i64::from(offset)));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), image_view_from_row)?;
        let mut images = Vec::new();
        for image in rows {
            images.push(image?);
        }
        Ok(images)
    }
}

fn group_where(
    dataset_id: i64,
    archetype: &str,
    category: &str,
    filter: DecisionFilter,
) -> (String, Vec<Value>) {
    let arch = json_field_expr(ARCHETYPE_KEYS, "i.metadata_json");
    let cat = json_field_expr(CATEGORY_KEYS, "i.metadata_json");
    let mut where_sql = format!("i.dataset_id = ? AND {arch} = ? AND {cat} = ?");
    let mut params = vec![
        Value::Integer(dataset_id),
        Value::Text(archetype.to_string()),
        Value::Text(category.to_string()),
    ];

    let (clause, bound) = filter.sql_clause();
    if let Some(clause) = clause {
        where_sql.push_str(" AND ");
        where_sql.push_str(clause);
    }
    if let Some(value) = bound {
        params.push(Value::Text(value.to_string()));
    }
    (where_sql, params)
}
