//! Durable progress tracking for the enrichment pipeline.
//!
//! Three file-backed stores, all owned by the driver:
//! - [`CheckpointStore`] — single-JSON-object progress record, rewritten
//!   atomically at a configurable cadence and at pipeline end.
//! - [`DedupCache`] — append-only JSONL map from item identifier to a
//!   previously produced result, giving identifier-keyed skip-on-resume.
//! - [`Sink`] — append-only JSONL log of successfully enriched records,
//!   consumed by the downstream indexer.
//!
//! A process killed between items loses at most the in-memory counters
//! since the last checkpoint save; persisted state is never corrupted
//! because the checkpoint is replaced via rename and the cache and sink
//! are append-only.

pub mod cache;
pub mod checkpoint;
pub mod sink;

pub use cache::{CacheEntry, DedupCache};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use sink::Sink;
