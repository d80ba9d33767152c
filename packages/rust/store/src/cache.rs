//! Dedup cache: an append-only JSONL log of already-produced results,
//! keyed by item identifier.
//!
//! The cache is the secondary resumption mechanism: even if the
//! checkpoint and dataset ordering ever diverge, an identifier present
//! here is never fetched again. Callers must check [`DedupCache::contains`]
//! before calling [`DedupCache::record`] — recording the same identifier
//! twice writes two durable lines.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use curio_shared::{CurioError, Result};

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

/// One durable cache line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Source item identifier.
    pub identifier: String,
    /// The enrichment result, or `None` as the structured
    /// "no result" marker (e.g., a cached terminal not-found).
    pub result: Option<serde_json::Value>,
    /// When the entry was produced.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// DedupCache
// ---------------------------------------------------------------------------

/// In-memory identifier map backed by an append-only JSONL file.
#[derive(Debug)]
pub struct DedupCache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
}

impl DedupCache {
    /// Load the cache from disk, called exactly once at startup.
    ///
    /// A missing file yields an empty cache. Individually corrupt lines
    /// are skipped with a warning rather than failing the whole load.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = HashMap::new();

        if path.exists() {
            let file = std::fs::File::open(&path).map_err(|e| CurioError::io(&path, e))?;
            let reader = BufReader::new(file);

            for (line_num, line) in reader.lines().enumerate() {
                let line = line.map_err(|e| CurioError::io(&path, e))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<CacheEntry>(&line) {
                    Ok(entry) => {
                        entries.insert(entry.identifier.clone(), entry);
                    }
                    Err(e) => {
                        warn!(line = line_num + 1, error = %e, "invalid cache line, skipping");
                    }
                }
            }

            info!(path = %path.display(), entries = entries.len(), "loaded dedup cache");
        }

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the identifier has already been processed.
    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn get(&self, identifier: &str) -> Option<&CacheEntry> {
        self.entries.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append one entry to the durable log and the in-memory map.
    ///
    /// `result: None` records the "no result" marker.
    pub fn record(
        &mut self,
        identifier: &str,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        let entry = CacheEntry {
            identifier: identifier.to_string(),
            result,
            timestamp: Utc::now(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CurioError::io(parent, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CurioError::io(&self.path, e))?;

        let line = serde_json::to_string(&entry)
            .map_err(|e| CurioError::Store(format!("serialize cache entry: {e}")))?;
        writeln!(file, "{line}").map_err(|e| CurioError::io(&self.path, e))?;

        self.entries.insert(entry.identifier.clone(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DedupCache::load(dir.path().join("cache.jsonl")).expect("load");
        assert!(cache.is_empty());
        assert!(!cache.contains("met_1"));
    }

    #[test]
    fn record_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");

        let mut cache = DedupCache::load(&path).expect("load");
        cache
            .record("met_1", Some(serde_json::json!({"primaryImage": "https://img"})))
            .expect("record");
        cache.record("met_2", None).expect("record marker");

        assert!(cache.contains("met_1"));
        assert_eq!(cache.len(), 2);

        let reloaded = DedupCache::load(&path).expect("reload");
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("met_1"));
        assert!(reloaded.get("met_2").unwrap().result.is_none());
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"identifier":"met_1","result":{"ok":true},"timestamp":"2025-06-01T00:00:00Z"}"#,
                "\n",
                "this is not json\n",
                r#"{"identifier":"met_3","result":null,"timestamp":"2025-06-01T00:00:01Z"}"#,
                "\n",
            ),
        )
        .unwrap();

        let cache = DedupCache::load(&path).expect("load tolerates corruption");
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("met_1"));
        assert!(cache.contains("met_3"));
    }

    #[test]
    fn at_most_one_in_memory_entry_per_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.jsonl");

        let mut cache = DedupCache::load(&path).expect("load");
        cache.record("met_1", Some(serde_json::json!(1))).unwrap();
        // Callers are responsible for the contains-check; a second
        // record still resolves to one map entry.
        cache.record("met_1", Some(serde_json::json!(2))).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
