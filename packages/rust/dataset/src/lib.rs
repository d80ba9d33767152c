//! Dataset loading: collection CSV exports and description sidecars.
//!
//! The pipeline consumes an ordered, finite, re-iterable sequence of
//! [`SourceItem`]s. This crate turns a museum CSV export into that
//! sequence, applies the row filter (classification / public-domain /
//! link predicates), and loads the optional JSONL sidecar of AI visual
//! descriptions merged into embedding payloads.

pub mod text;

pub use text::compose_text;

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use curio_shared::{CurioError, Result, SourceItem};

// ---------------------------------------------------------------------------
// CSV row shape
// ---------------------------------------------------------------------------

/// One raw CSV row. Header names cover the collection exports this
/// tool ingests (`Object ID` vs. `ObjectID` etc.); every field except
/// the identifier is optional because exports are sparse.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "ObjectID", alias = "Object ID")]
    object_id: String,
    #[serde(default, rename = "Title")]
    title: Option<String>,
    #[serde(default, rename = "Artist", alias = "Artist Display Name")]
    artist: Option<String>,
    #[serde(default, rename = "Date", alias = "Object Date")]
    date: Option<String>,
    #[serde(default, rename = "Medium")]
    medium: Option<String>,
    #[serde(default, rename = "Classification")]
    classification: Option<String>,
    #[serde(default, rename = "Department")]
    department: Option<String>,
    #[serde(default, rename = "Nationality", alias = "Artist Nationality")]
    nationality: Option<String>,
    #[serde(default, rename = "ArtistBio", alias = "Artist Display Bio")]
    artist_bio: Option<String>,
    #[serde(default, rename = "CreditLine", alias = "Credit Line")]
    credit_line: Option<String>,
    #[serde(default, rename = "Dimensions")]
    dimensions: Option<String>,
    #[serde(default, rename = "ImageURL")]
    image_url: Option<String>,
    #[serde(default, rename = "Is Public Domain")]
    is_public_domain: Option<String>,
    #[serde(default, rename = "Link Resource")]
    link_resource: Option<String>,
}

// ---------------------------------------------------------------------------
// Row filter
// ---------------------------------------------------------------------------

/// Predicate applied to CSV rows before they become items.
///
/// The defaults keep everything; a Met-style "public-domain paintings"
/// run sets all three fields.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Keep only rows whose classification equals this (case-insensitive).
    pub classification: Option<String>,
    /// Keep only rows marked public domain.
    pub public_domain_only: bool,
    /// Keep only rows with a non-empty link resource.
    pub require_link: bool,
}

impl ItemFilter {
    fn matches(&self, row: &CsvRow) -> bool {
        if let Some(wanted) = &self.classification {
            let got = row.classification.as_deref().unwrap_or("");
            if !got.eq_ignore_ascii_case(wanted) {
                return false;
            }
        }

        if self.public_domain_only {
            let flag = row.is_public_domain.as_deref().unwrap_or("");
            if !flag.eq_ignore_ascii_case("true") {
                return false;
            }
        }

        if self.require_link
            && row
                .link_resource
                .as_deref()
                .is_none_or(|l| l.trim().is_empty())
        {
            return false;
        }

        true
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// The ordered source dataset for one pipeline run.
#[derive(Debug)]
pub struct Dataset {
    path: PathBuf,
    items: Vec<SourceItem>,
}

impl Dataset {
    /// Load a CSV export, keeping rows that pass `filter` and prefixing
    /// identifiers with `id_prefix` (e.g., `moma_` + ObjectID).
    ///
    /// A missing dataset file is fatal: the pipeline must not start.
    pub fn load_csv(path: impl Into<PathBuf>, id_prefix: &str, filter: &ItemFilter) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            return Err(CurioError::validation(format!(
                "dataset CSV not found at {}. Download the collection export first.",
                path.display()
            )));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .map_err(|e| CurioError::dataset(format!("{}: {e}", path.display())))?;

        let mut items = Vec::new();
        for (row_num, result) in reader.deserialize::<CsvRow>().enumerate() {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    warn!(row = row_num + 2, error = %e, "unreadable CSV row, skipping");
                    continue;
                }
            };

            if row.object_id.trim().is_empty() || !filter.matches(&row) {
                continue;
            }

            items.push(SourceItem {
                id: format!("{id_prefix}{}", row.object_id.trim()),
                title: non_empty(row.title),
                artist: non_empty(row.artist),
                date: non_empty(row.date),
                medium: non_empty(row.medium),
                classification: non_empty(row.classification),
                department: non_empty(row.department),
                nationality: non_empty(row.nationality),
                artist_bio: non_empty(row.artist_bio),
                credit_line: non_empty(row.credit_line),
                dimensions: non_empty(row.dimensions),
                image_url: non_empty(row.image_url),
            });
        }

        info!(path = %path.display(), items = items.len(), "loaded dataset");
        Ok(Self { path, items })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn items(&self) -> &[SourceItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Description sidecar
// ---------------------------------------------------------------------------

/// AI visual description attached to an item before embedding.
#[derive(Debug, Clone, Default)]
pub struct Description {
    pub alt_text: Option<String>,
    pub long_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescriptionRecord {
    artwork_id: String,
    #[serde(default)]
    alt_text: Option<String>,
    #[serde(default)]
    long_description: Option<String>,
}

/// Load the JSONL description sidecar into an identifier-keyed map.
///
/// A missing file is not an error — descriptions are optional input.
/// Corrupt lines are skipped.
pub fn load_descriptions(path: &Path) -> Result<HashMap<String, Description>> {
    let mut map = HashMap::new();

    if !path.exists() {
        info!(path = %path.display(), "no descriptions sidecar, continuing without");
        return Ok(map);
    }

    let file = std::fs::File::open(path).map_err(|e| CurioError::io(path, e))?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| CurioError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DescriptionRecord>(&line) {
            Ok(record) => {
                map.insert(
                    record.artwork_id,
                    Description {
                        alt_text: record.alt_text,
                        long_description: record.long_description,
                    },
                );
            }
            Err(e) => debug!(error = %e, "skipping invalid description line"),
        }
    }

    info!(path = %path.display(), descriptions = map.len(), "loaded descriptions");
    Ok(map)
}
