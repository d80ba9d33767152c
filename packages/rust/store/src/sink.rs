//! Output sink: append-only JSONL log of successfully enriched records.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use curio_shared::{CurioError, OutputRecord, Result};

/// Append-only durable destination for [`OutputRecord`]s.
///
/// Opening with `resume = false` truncates any existing file; with
/// `resume = true` new records are appended after previous runs'.
#[derive(Debug)]
pub struct Sink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Sink {
    /// Open (or create) the sink file. Fails fast if the file cannot be
    /// opened — the pipeline must not start without a writable sink.
    pub fn open(path: impl Into<PathBuf>, resume: bool) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CurioError::io(parent, e))?;
        }

        let file = if resume {
            OpenOptions::new().create(true).append(true).open(&path)
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
        }
        .map_err(|e| CurioError::io(&path, e))?;

        debug!(path = %path.display(), resume, "sink opened");

        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it to durable storage.
    pub fn append(&mut self, record: &OutputRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| CurioError::Store(format!("serialize output record: {e}")))?;
        writeln!(self.writer, "{line}").map_err(|e| CurioError::io(&self.path, e))?;
        self.writer
            .flush()
            .map_err(|e| CurioError::io(&self.path, e))?;
        Ok(())
    }
}
