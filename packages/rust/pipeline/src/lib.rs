//! Batch enrichment driver: the resilient checkpointed pipeline core.
//!
//! Iterates an ordered dataset one item at a time, consults the dedup
//! cache, invokes the rate-limited retrying client, streams successes
//! to the output sink, and keeps the checkpoint current so an
//! interrupted run resumes exactly where it stopped.

pub mod driver;

pub use driver::{PipelineConfig, Progress, RunSummary, SilentProgress, run_pipeline};
