//! Checkpoint persistence: a single JSON record of how far the
//! pipeline has progressed, used to resume after interruption.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use curio_shared::{CurioError, Result};

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Process-wide progress record, mutated after every item and persisted
/// at a configurable cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the last fully processed item, -1 if none.
    pub last_processed_index: i64,
    /// Items successfully enriched.
    pub total_processed: u64,
    /// Items skipped (cache hit, empty payload, or terminal not-found).
    pub total_skipped: u64,
    /// Items that exhausted retries.
    pub total_failed: u64,
    /// Identifier of the last-processed item.
    pub last_identifier: String,
    /// When the checkpoint was last updated.
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    /// The zero-valued record used when no prior checkpoint exists.
    pub fn empty() -> Self {
        Self {
            last_processed_index: -1,
            total_processed: 0,
            total_skipped: 0,
            total_failed: 0,
            last_identifier: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// The dataset index the next run should start from.
    pub fn resume_index(&self) -> usize {
        (self.last_processed_index + 1).max(0) as usize
    }

    /// Record that item `index` with `identifier` has been fully
    /// processed (regardless of outcome class).
    pub fn advance(&mut self, index: usize, identifier: &str) {
        self.last_processed_index = index as i64;
        self.last_identifier = identifier.to_string();
        self.timestamp = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// File-backed store for the singleton [`Checkpoint`].
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Create a store at the given path. The file itself is created
    /// lazily on the first `save`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint, returning the zero record if no file exists.
    pub fn load(&self) -> Result<Checkpoint> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no checkpoint found, starting fresh");
            return Ok(Checkpoint::empty());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| CurioError::io(&self.path, e))?;

        let checkpoint: Checkpoint = serde_json::from_str(&content).map_err(|e| {
            CurioError::Store(format!(
                "corrupt checkpoint at {}: {e}",
                self.path.display()
            ))
        })?;

        info!(
            last_index = checkpoint.last_processed_index,
            processed = checkpoint.total_processed,
            skipped = checkpoint.total_skipped,
            failed = checkpoint.total_failed,
            "loaded checkpoint"
        );

        Ok(checkpoint)
    }

    /// Persist the full record, replacing any previous one atomically
    /// (write to a temp file, then rename into place).
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CurioError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| CurioError::Store(format!("serialize checkpoint: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| CurioError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| CurioError::io(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            last_index = checkpoint.last_processed_index,
            "checkpoint saved"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));

        let checkpoint = store.load().expect("load");
        assert_eq!(checkpoint.last_processed_index, -1);
        assert_eq!(checkpoint.total_processed, 0);
        assert_eq!(checkpoint.resume_index(), 0);
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));

        let mut checkpoint = Checkpoint::empty();
        checkpoint.advance(41, "met_436535");
        checkpoint.total_processed = 40;
        checkpoint.total_skipped = 1;
        checkpoint.total_failed = 1;
        store.save(&checkpoint).expect("save");

        let loaded = store.load().expect("reload");
        assert_eq!(loaded.last_processed_index, 41);
        assert_eq!(loaded.last_identifier, "met_436535");
        assert_eq!(loaded.resume_index(), 42);
        assert_eq!(loaded.total_processed, 40);
    }

    #[test]
    fn save_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));

        let mut checkpoint = Checkpoint::empty();
        checkpoint.advance(3, "a");
        store.save(&checkpoint).expect("save");
        checkpoint.advance(7, "b");
        store.save(&checkpoint).expect("save again");

        let loaded = store.load().expect("reload");
        assert_eq!(loaded.last_processed_index, 7);
        assert_eq!(loaded.last_identifier, "b");

        // The file holds exactly one JSON object, not appended records.
        let content = std::fs::read_to_string(store.path()).unwrap();
        let parsed: Checkpoint = serde_json::from_str(&content).expect("single object");
        assert_eq!(parsed.last_processed_index, 7);
    }

    #[test]
    fn corrupt_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = CheckpointStore::new(&path);
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("corrupt checkpoint"));
    }

    #[test]
    fn file_format_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));

        let mut checkpoint = Checkpoint::empty();
        checkpoint.advance(0, "met_1");
        store.save(&checkpoint).expect("save");

        let content = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        for field in [
            "last_processed_index",
            "total_processed",
            "total_skipped",
            "total_failed",
            "last_identifier",
            "timestamp",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
    }
}
