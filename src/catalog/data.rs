//! Shared data structures for the catalog.
//!
//! These structs represent the data model that flows between
//! the database layer and its callers (CLI, future UI).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named collection of images rooted at one directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Unique database ID
    pub id: i64,
    /// Display name, unique across datasets
    pub name: String,
    /// Absolute root directory containing the image files
    pub root_dir: String,
    /// RFC 3339 creation timestamp
    pub created_at: String,
}

/// The operator's verdict on an image.
///
/// Absence of a decision ("unmarked") is modeled as `Option<Decision>` being
/// `None`, never as a fourth variant: a decisions row only exists while its
/// value is one of these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Keep,
    Discard,
    Unsure,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Keep => "keep",
            Decision::Discard => "discard",
            Decision::Unsure => "unsure",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = ();

    /// Strict parse of the canonical vocabulary. Loose synonym handling
    /// lives in the import layer, not here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(Decision::Keep),
            "discard" => Ok(Decision::Discard),
            "unsure" => Ok(Decision::Unsure),
            _ => Err(()),
        }
    }
}

/// Which images to include when listing or counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecisionFilter {
    #[default]
    All,
    Keep,
    Discard,
    Unsure,
    /// Images with no decisions row at all.
    Unmarked,
}

impl DecisionFilter {
    /// The `WHERE` fragment for this filter against the joined decisions
    /// table, plus the bound decision value when one is needed.
    pub(crate) fn sql_clause(self) -> (Option<&'static str>, Option<&'static str>) {
        match self {
            DecisionFilter::All => (None, None),
            DecisionFilter::Unmarked => (Some("d.image_id IS NULL"), None),
            DecisionFilter::Keep => (Some("d.decision = ?"), Some("keep")),
            DecisionFilter::Discard => (Some("d.decision = ?"), Some("discard")),
            DecisionFilter::Unsure => (Some("d.decision = ?"), Some("unsure")),
        }
    }
}

/// Listing order for image pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    Name,
    Path,
    /// Re-sampled on every query; no stable seed.
    Random,
}

impl OrderBy {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            OrderBy::Name => "ORDER BY i.image_name",
            OrderBy::Path => "ORDER BY i.image_path",
            OrderBy::Random => "ORDER BY RANDOM()",
        }
    }
}

/// One image row as supplied by the ingestion boundary.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub image_name: String,
    /// Path relative to the dataset root
    pub image_path: String,
    /// Arbitrary key→value metadata; absent CSV cells arrive as JSON null
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// One catalog image joined with its (optional) decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageView {
    /// Unique database ID
    pub id: i64,
    /// Owning dataset
    pub dataset_id: i64,
    /// Display name (e.g. "DSC_0001.jpg")
    pub image_name: String,
    /// Path relative to the dataset root, forward slashes
    pub image_path: String,
    /// Raw serialized metadata payload
    pub metadata_json: String,
    /// Decision value; `None` when unmarked
    pub decision: Option<Decision>,
    /// Free-text note attached to the decision
    pub note: Option<String>,
    /// RFC 3339 timestamp of the last decision update
    pub updated_at: Option<String>,
}

impl ImageView {
    /// Parse the metadata payload. A malformed payload degrades to an empty
    /// map rather than failing the read.
    pub fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str(&self.metadata_json).unwrap_or_default()
    }
}

/// Parameters for a paged catalog query. Passed explicitly by the caller;
/// the core keeps no session state.
#[derive(Debug, Clone)]
pub struct ImageQuery {
    pub decision_filter: DecisionFilter,
    pub search_text: String,
    pub order_by: OrderBy,
    pub limit: u32,
    pub offset: u32,
}

impl Default for ImageQuery {
    fn default() -> Self {
        ImageQuery {
            decision_filter: DecisionFilter::All,
            search_text: String::new(),
            order_by: OrderBy::Name,
            limit: 60,
            offset: 0,
        }
    }
}
