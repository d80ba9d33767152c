//! Core domain types for the enrichment pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SourceItem
// ---------------------------------------------------------------------------

/// One entry from the collection dataset being enriched.
///
/// Items are read-only to the pipeline: the driver consumes them in
/// dataset order and never mutates them. Only `id` is required; every
/// metadata field is optional because collection exports are sparse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    /// Stable unique identifier (e.g., `met_436535`).
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
    /// Primary image URL, when the export carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl SourceItem {
    /// Construct a minimal item with only an identifier (test helper
    /// and placeholder for identifier-keyed API fetches).
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            artist: None,
            date: None,
            medium: None,
            classification: None,
            department: None,
            nationality: None,
            artist_bio: None,
            credit_line: None,
            dimensions: None,
            image_url: None,
        }
    }

    /// Whether the export carried a usable image URL.
    pub fn has_image(&self) -> bool {
        self.image_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

// ---------------------------------------------------------------------------
// OutputRecord
// ---------------------------------------------------------------------------

/// One line of the output sink: a successfully enriched item.
///
/// The sink is append-only JSONL; the downstream indexer performs a
/// bulk upsert keyed by `identifier`, merging per-model results into a
/// single document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Source item identifier.
    pub identifier: String,
    /// Enrichment result payload (vector, fetched metadata, ...).
    pub result: serde_json::Value,
    /// Producing model or service tag (e.g., `jina_v3`). Serialized as
    /// `producing_model`, the field name downstream consumers read.
    #[serde(rename = "producing_model")]
    pub model: String,
    /// When the record was produced.
    pub timestamp: DateTime<Utc>,
}
