//! Bulk indexing of sink output into a search index.
//!
//! Reads the enrichment sink (JSONL of [`OutputRecord`]s), batches the
//! records, and upserts them into Elasticsearch with `_bulk` update
//! actions. Documents are keyed by identifier and accumulate one
//! `embeddings.<model>` field per producing model, so repeated runs
//! with different models merge into the same document.

use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use curio_shared::{CurioError, OutputRecord, Result};

// ---------------------------------------------------------------------------
// Sink reading
// ---------------------------------------------------------------------------

/// Read all records from a sink JSONL file.
///
/// Corrupt lines are logged and skipped so one bad write never blocks
/// indexing the rest of the file. A missing file is fatal: there is
/// nothing to index.
pub fn load_records(path: &Path) -> Result<Vec<OutputRecord>> {
    let file = std::fs::File::open(path).map_err(|e| CurioError::io(path, e))?;
    let mut records = Vec::new();

    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| CurioError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<OutputRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(line = line_num + 1, error = %e, "skipping corrupt sink line");
            }
        }
    }

    info!(path = %path.display(), records = records.len(), "loaded sink records");
    Ok(records)
}

// ---------------------------------------------------------------------------
// Indexer
// ---------------------------------------------------------------------------

/// Counts from one bulk-upsert run.
#[derive(Debug, Clone, Default)]
pub struct IndexSummary {
    /// Documents accepted by the index.
    pub indexed: u64,
    /// Documents rejected within otherwise-successful batches.
    pub failed: u64,
    /// Number of `_bulk` requests sent.
    pub batches: u64,
}

/// Elasticsearch bulk-upsert client.
pub struct Indexer {
    client: reqwest::Client,
    base_url: String,
    index: String,
    api_key: Option<String>,
    batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

impl Indexer {
    pub fn new(
        base_url: impl Into<String>,
        index: impl Into<String>,
        api_key: Option<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index: index.into(),
            api_key,
            batch_size: batch_size.max(1),
        }
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("ApiKey {key}")),
            None => request,
        }
    }

    /// Create the index with a dense_vector mapping if it does not exist.
    ///
    /// `dims` is taken from the first record's embedding so the mapping
    /// matches whatever model produced the sink.
    pub async fn ensure_index(&self, model: &str, dims: usize) -> Result<()> {
        let url = format!("{}/{}", self.base_url, self.index);

        let head = self
            .authed(self.client.head(&url))
            .send()
            .await
            .map_err(|e| CurioError::Index(format!("checking index: {e}")))?;

        if head.status().is_success() {
            debug!(index = %self.index, "index already exists");
            return Ok(());
        }

        let mut vector_fields = serde_json::Map::new();
        vector_fields.insert(
            model.to_string(),
            json!({
                "type": "dense_vector",
                "dims": dims,
                "index": true,
                "similarity": "cosine"
            }),
        );
        let mapping = json!({
            "mappings": {
                "properties": {
                    "artwork_id": { "type": "keyword" },
                    "updated_at": { "type": "date" },
                    "embeddings": { "properties": vector_fields }
                }
            }
        });

        let response = self
            .authed(self.client.put(&url))
            .json(&mapping)
            .send()
            .await
            .map_err(|e| CurioError::Index(format!("creating index: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CurioError::Index(format!(
                "creating index {}: HTTP {status}: {body}",
                self.index
            )));
        }

        info!(index = %self.index, dims, "created index");
        Ok(())
    }

    /// Upsert all records in `batch_size` chunks.
    ///
    /// Rejected documents within a batch are counted and logged with
    /// the index's reason; they never abort the run. A failed `_bulk`
    /// request (transport or non-2xx) is fatal.
    pub async fn bulk_upsert(&self, records: &[OutputRecord]) -> Result<IndexSummary> {
        let mut summary = IndexSummary::default();

        for chunk in records.chunks(self.batch_size) {
            let body = self.bulk_body(chunk);
            summary.batches += 1;

            let response = self
                .authed(self.client.post(format!("{}/_bulk", self.base_url)))
                .header("Content-Type", "application/x-ndjson")
                .body(body)
                .send()
                .await
                .map_err(|e| CurioError::Index(format!("bulk request: {e}")))?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(CurioError::Index(format!("bulk request: HTTP {status}")));
            }

            let parsed: BulkResponse = response
                .json()
                .await
                .map_err(|e| CurioError::Index(format!("bulk response: {e}")))?;

            if !parsed.errors {
                summary.indexed += chunk.len() as u64;
                debug!(batch = summary.batches, size = chunk.len(), "batch indexed");
                continue;
            }

            // Partial failure: count per-item results.
            for item in &parsed.items {
                let update = &item["update"];
                if update["error"].is_object() {
                    summary.failed += 1;
                    warn!(
                        id = %update["_id"].as_str().unwrap_or("?"),
                        reason = %update["error"]["reason"].as_str().unwrap_or("unknown"),
                        "document rejected"
                    );
                } else {
                    summary.indexed += 1;
                }
            }
        }

        info!(
            indexed = summary.indexed,
            failed = summary.failed,
            batches = summary.batches,
            "bulk upsert complete"
        );
        Ok(summary)
    }

    /// Build the NDJSON `_bulk` body for one chunk: an update action
    /// with `doc_as_upsert` per record, so existing documents gain the
    /// record's model field without losing other models' embeddings.
    fn bulk_body(&self, chunk: &[OutputRecord]) -> String {
        let mut body = String::new();
        for record in chunk {
            let action = json!({
                "update": { "_index": self.index, "_id": record.identifier }
            });
            let mut embeddings = serde_json::Map::new();
            embeddings.insert(record.model.clone(), record.result.clone());
            let doc = json!({
                "doc": {
                    "artwork_id": record.identifier,
                    "updated_at": record.timestamp,
                    "embeddings": embeddings
                },
                "doc_as_upsert": true
            });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&doc.to_string());
            body.push('\n');
        }
        body
    }
}

/// Vector dimensionality of the first array-shaped result, if any.
pub fn embedding_dims(records: &[OutputRecord]) -> Option<usize> {
    records
        .iter()
        .find_map(|r| r.result.as_array().map(|a| a.len()))
}
