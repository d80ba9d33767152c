//! The driver state machine: INIT → LOADING → RUNNING → (SAVING)* → DONE.
//!
//! Strictly sequential: items are never processed concurrently, and the
//! checkpoint, cache, and sink are mutated only at the well-defined
//! points below. Killing the process between items loses at most the
//! in-memory counters since the last checkpoint save.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use curio_client::{CallPayload, FetchOutcome, RetryClient, CollectionService};
use curio_shared::config::RunConfig;
use curio_shared::{OutputRecord, Result, SourceItem};
use curio_store::{Checkpoint, CheckpointStore, DedupCache, Sink};

// ---------------------------------------------------------------------------
// Config & summary
// ---------------------------------------------------------------------------

/// Everything the driver needs for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Runtime options (limit, resume, delay, checkpoint cadence, ...).
    pub run: RunConfig,
    /// Producing-model/service tag stamped on output records.
    pub model: String,
    /// Checkpoint file path.
    pub checkpoint_path: PathBuf,
    /// Dedup cache file path.
    pub cache_path: PathBuf,
    /// Output sink file path.
    pub sink_path: PathBuf,
}

/// End-of-run counts for this session plus the final checkpoint.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Items successfully enriched this session.
    pub processed: u64,
    /// Items skipped this session (cache hit, empty payload, not-found).
    pub skipped: u64,
    /// Items that exhausted retries this session.
    pub failed: u64,
    /// Final persisted checkpoint (cumulative across runs).
    pub checkpoint: Checkpoint,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for driver runs.
pub trait Progress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before each item is visited.
    fn item(&self, current: usize, total: usize, identifier: &str);
    /// Called once at the end of the run.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress for headless/test usage.
pub struct SilentProgress;

impl Progress for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item(&self, _current: usize, _total: usize, _identifier: &str) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run the pipeline over `items`.
///
/// `payload_for` builds the external call's input from an item;
/// returning `None` means the item has nothing to send (e.g., no text
/// content) and is counted as skipped without an external call.
///
/// Fatal preconditions (unopenable sink, unreadable checkpoint) surface
/// before any item is processed. Per-item failures never abort the run.
#[instrument(skip_all, fields(model = %config.model, items = items.len()))]
pub async fn run_pipeline<S, F>(
    config: &PipelineConfig,
    items: &[SourceItem],
    client: &mut RetryClient<S>,
    payload_for: F,
    progress: &dyn Progress,
) -> Result<RunSummary>
where
    S: CollectionService,
    F: Fn(&SourceItem) -> Option<CallPayload>,
{
    let start_time = Instant::now();
    let run_id = Uuid::now_v7();

    // --- INIT: open sink first; a pipeline without a sink must not start.
    progress.phase("Opening output sink");
    let mut sink = Sink::open(&config.sink_path, config.run.resume)?;

    // --- LOADING: checkpoint and dedup cache.
    progress.phase("Loading checkpoint and cache");
    let checkpoint_store = CheckpointStore::new(&config.checkpoint_path);
    let mut checkpoint = if config.run.resume {
        checkpoint_store.load()?
    } else {
        Checkpoint::empty()
    };
    let mut cache = DedupCache::load(&config.cache_path)?;

    let start_index = if config.run.resume {
        checkpoint.resume_index()
    } else {
        0
    };
    let end_index = match config.run.limit {
        Some(limit) => (start_index + limit).min(items.len()),
        None => items.len(),
    };

    info!(
        %run_id,
        start = start_index,
        end = end_index,
        resume = config.run.resume,
        cached = cache.len(),
        delay_ms = config.run.delay.as_millis() as u64,
        checkpoint_interval = config.run.checkpoint_interval,
        "starting pipeline run"
    );

    // Interval 0 would never save; treat it as save-every-item.
    let save_interval = config.run.checkpoint_interval.max(1);

    let mut processed: u64 = 0;
    let mut skipped: u64 = 0;
    let mut failed: u64 = 0;

    // --- RUNNING: one item at a time, in dataset order.
    progress.phase("Processing items");
    for i in start_index..end_index {
        let item = &items[i];
        progress.item(i + 1, end_index, &item.id);

        // Whether this item cost an external call; only those items
        // need the inter-item pacing delay.
        let mut called = false;

        // 1. Identifier-keyed skip: already produced on a prior run.
        if cache.contains(&item.id) {
            skipped += 1;
            checkpoint.total_skipped += 1;
        } else if let Some(payload) = payload_for(item) {
            // 2./3. External call with retries/backoff inside the client.
            called = true;
            match client.fetch_or_compute(&item.id, &payload).await {
                FetchOutcome::Fetched(result) => {
                    let record = OutputRecord {
                        identifier: item.id.clone(),
                        result: result.clone(),
                        model: config.model.clone(),
                        timestamp: Utc::now(),
                    };
                    sink.append(&record)?;
                    cache.record(&item.id, Some(result))?;
                    processed += 1;
                    checkpoint.total_processed += 1;
                }
                FetchOutcome::NotFound => {
                    skipped += 1;
                    checkpoint.total_skipped += 1;
                    if config.run.cache_not_found {
                        cache.record(&item.id, None)?;
                    }
                }
                FetchOutcome::Exhausted => {
                    failed += 1;
                    checkpoint.total_failed += 1;
                }
            }
        } else {
            // Nothing to send counts as skipped, without a call.
            warn!(identifier = %item.id, "no payload content, skipping");
            skipped += 1;
            checkpoint.total_skipped += 1;
        }

        // 4. The checkpoint tracks the last visited item unconditionally.
        checkpoint.advance(i, &item.id);

        // 5. SAVING: persist at the configured cadence, whatever the
        //    item's outcome class was.
        if (i - start_index + 1) % save_interval == 0 {
            checkpoint_store.save(&checkpoint)?;
        }

        // 6. Inter-item delay, except after the final item.
        if called && i + 1 < end_index && !config.run.delay.is_zero() {
            tokio::time::sleep(config.run.delay).await;
        }
    }

    // --- DONE: final checkpoint save is unconditional.
    checkpoint_store.save(&checkpoint)?;

    let summary = RunSummary {
        processed,
        skipped,
        failed,
        checkpoint,
        elapsed: start_time.elapsed(),
    };

    info!(
        %run_id,
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        total_processed = summary.checkpoint.total_processed,
        total_skipped = summary.checkpoint.total_skipped,
        total_failed = summary.checkpoint.total_failed,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "pipeline run complete"
    );

    progress.done(&summary);
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use curio_client::{CallOutcome, RetryPolicy};

    /// Scripted per-identifier service that counts every call.
    struct MockService {
        scripts: Mutex<HashMap<String, Vec<CallOutcome>>>,
        total_calls: AtomicU64,
    }

    impl MockService {
        fn new(scripts: Vec<(&str, Vec<CallOutcome>)>) -> Self {
            let map = scripts
                .into_iter()
                .map(|(id, mut outcomes)| {
                    outcomes.reverse();
                    (id.to_string(), outcomes)
                })
                .collect();
            Self {
                scripts: Mutex::new(map),
                total_calls: AtomicU64::new(0),
            }
        }

        fn total_calls(&self) -> u64 {
            self.total_calls.load(Ordering::SeqCst)
        }
    }

    impl CollectionService for &MockService {
        async fn call(&self, payload: &CallPayload) -> CallOutcome {
            self.total_calls.fetch_add(1, Ordering::SeqCst);
            let CallPayload::ObjectKey(id) = payload else {
                return CallOutcome::Transient("unexpected payload".into());
            };
            self.scripts
                .lock()
                .unwrap()
                .get_mut(id)
                .and_then(|script| script.pop())
                .unwrap_or(CallOutcome::Transient("no script".into()))
        }
    }

    fn ok_result(id: &str) -> CallOutcome {
        CallOutcome::Ok(serde_json::json!({ "for": id }))
    }

    fn items(ids: &[&str]) -> Vec<SourceItem> {
        ids.iter().map(|id| SourceItem::bare(*id)).collect()
    }

    fn test_config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            run: RunConfig {
                limit: None,
                resume: true,
                delay: Duration::ZERO,
                checkpoint_interval: 2,
                cache_not_found: false,
                device: "cpu".into(),
            },
            model: "jina_v3".into(),
            checkpoint_path: dir.join("progress.json"),
            cache_path: dir.join("cache.jsonl"),
            sink_path: dir.join("out.jsonl"),
        }
    }

    fn zero_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::ZERO,
            rate_limit_cap: Duration::ZERO,
        }
    }

    fn object_key(item: &SourceItem) -> Option<CallPayload> {
        Some(CallPayload::ObjectKey(item.id.clone()))
    }

    fn sink_identifiers(path: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| {
                serde_json::from_str::<OutputRecord>(l)
                    .expect("valid sink line")
                    .identifier
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn three_item_scenario_counts_and_checkpoint() {
        // A succeeds; B is rate-limited with a 2s interval then
        // succeeds; C does not exist upstream.
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let service = MockService::new(vec![
            ("A", vec![ok_result("A")]),
            (
                "B",
                vec![
                    CallOutcome::RateLimited {
                        retry_after: Some(Duration::from_secs(2)),
                    },
                    ok_result("B"),
                ],
            ),
            ("C", vec![CallOutcome::NotFound]),
        ]);
        let mut client = RetryClient::new(&service, zero_policy());

        let summary = run_pipeline(
            &config,
            &items(&["A", "B", "C"]),
            &mut client,
            object_key,
            &SilentProgress,
        )
        .await
        .expect("run");

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.checkpoint.last_processed_index, 2);
        assert_eq!(summary.checkpoint.last_identifier, "C");
        assert_eq!(sink_identifiers(&config.sink_path), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn exhausted_retries_count_failed_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let service = MockService::new(vec![
            ("A", vec![CallOutcome::Transient("down".into()); 5]),
            ("B", vec![ok_result("B")]),
        ]);
        let mut client = RetryClient::new(&service, zero_policy());

        let summary = run_pipeline(
            &config,
            &items(&["A", "B"]),
            &mut client,
            object_key,
            &SilentProgress,
        )
        .await
        .expect("run");

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 1);
        assert_eq!(sink_identifiers(&config.sink_path), vec!["B"]);
        // 5 attempts for A, 1 for B.
        assert_eq!(service.total_calls(), 6);
    }

    #[tokio::test]
    async fn idempotent_resume_makes_zero_additional_calls() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let dataset = items(&["A", "B"]);

        let service = MockService::new(vec![
            ("A", vec![ok_result("A")]),
            ("B", vec![ok_result("B")]),
        ]);
        let mut client = RetryClient::new(&service, zero_policy());
        run_pipeline(&config, &dataset, &mut client, object_key, &SilentProgress)
            .await
            .expect("first run");
        assert_eq!(service.total_calls(), 2);
        let sink_before = std::fs::read_to_string(&config.sink_path).unwrap();
        let cache_before = std::fs::read_to_string(&config.cache_path).unwrap();

        // Second run with resume: checkpoint already points past the end.
        run_pipeline(&config, &dataset, &mut client, object_key, &SilentProgress)
            .await
            .expect("second run");
        assert_eq!(service.total_calls(), 2);
        assert_eq!(
            std::fs::read_to_string(&config.sink_path).unwrap(),
            sink_before
        );
        assert_eq!(
            std::fs::read_to_string(&config.cache_path).unwrap(),
            cache_before
        );
    }

    #[tokio::test]
    async fn crash_resume_starts_at_next_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        let ids = ["i0", "i1", "i2", "i3", "i4", "i5", "i6", "i7", "i8", "i9"];
        let dataset = items(&ids);

        let all_ok =
            |subset: &[&str]| MockService::new(subset.iter().map(|id| (*id, vec![ok_result(id)])).collect());

        // First run processes items 0..4, then "crashes" (limit).
        config.run.limit = Some(5);
        let service = all_ok(&ids[..5]);
        let mut client = RetryClient::new(&service, zero_policy());
        let summary =
            run_pipeline(&config, &dataset, &mut client, object_key, &SilentProgress)
                .await
                .expect("first run");
        assert_eq!(summary.checkpoint.last_processed_index, 4);

        // Restart with resume: only items 5..9 hit the service.
        config.run.limit = None;
        let service = all_ok(&ids[5..]);
        let mut client = RetryClient::new(&service, zero_policy());
        let summary =
            run_pipeline(&config, &dataset, &mut client, object_key, &SilentProgress)
                .await
                .expect("second run");

        assert_eq!(service.total_calls(), 5);
        assert_eq!(summary.processed, 5);
        assert_eq!(summary.checkpoint.last_processed_index, 9);
        assert_eq!(summary.checkpoint.total_processed, 10);
        assert_eq!(
            sink_identifiers(&config.sink_path),
            ids.iter().map(|s| s.to_string()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn checkpoint_index_is_monotonic_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        let dataset = items(&["a", "b", "c", "d"]);

        let mut last_index = -1;
        for limit in [2, 1, 4] {
            config.run.limit = Some(limit);
            let service = MockService::new(
                ["a", "b", "c", "d"]
                    .iter()
                    .map(|id| (*id, vec![ok_result(id)]))
                    .collect(),
            );
            let mut client = RetryClient::new(&service, zero_policy());
            let summary =
                run_pipeline(&config, &dataset, &mut client, object_key, &SilentProgress)
                    .await
                    .expect("run");
            assert!(summary.checkpoint.last_processed_index >= last_index);
            last_index = summary.checkpoint.last_processed_index;
        }
        assert_eq!(last_index, 3);
    }

    #[tokio::test]
    async fn no_duplicate_identifiers_in_cache_after_repeated_runs() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let dataset = items(&["x", "y"]);

        for _ in 0..3 {
            let service = MockService::new(vec![
                ("x", vec![ok_result("x")]),
                ("y", vec![ok_result("y")]),
            ]);
            let mut client = RetryClient::new(&service, zero_policy());
            run_pipeline(&config, &dataset, &mut client, object_key, &SilentProgress)
                .await
                .expect("run");
        }

        let lines: Vec<String> = std::fs::read_to_string(&config.cache_path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        assert_eq!(lines.len(), 2, "one durable cache line per identifier");
    }

    #[tokio::test]
    async fn not_found_is_cached_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.run.cache_not_found = true;
        let dataset = items(&["gone"]);

        let service = MockService::new(vec![("gone", vec![CallOutcome::NotFound])]);
        let mut client = RetryClient::new(&service, zero_policy());
        run_pipeline(&config, &dataset, &mut client, object_key, &SilentProgress)
            .await
            .expect("first run");
        assert_eq!(service.total_calls(), 1);

        // A fresh-start run still consults the durable cache: no new call.
        config.run.resume = false;
        let service = MockService::new(vec![("gone", vec![CallOutcome::NotFound])]);
        let mut client = RetryClient::new(&service, zero_policy());
        let summary =
            run_pipeline(&config, &dataset, &mut client, object_key, &SilentProgress)
                .await
                .expect("second run");
        assert_eq!(service.total_calls(), 0);
        assert_eq!(summary.skipped, 1);
    }

    /// Records the persisted checkpoint index as each item is visited.
    struct SnapshotProgress {
        path: PathBuf,
        seen: Mutex<Vec<Option<i64>>>,
    }

    impl Progress for SnapshotProgress {
        fn phase(&self, _name: &str) {}
        fn item(&self, _current: usize, _total: usize, _identifier: &str) {
            let index = std::fs::read_to_string(&self.path)
                .ok()
                .and_then(|s| serde_json::from_str::<Checkpoint>(&s).ok())
                .map(|c| c.last_processed_index);
            self.seen.lock().unwrap().push(index);
        }
        fn done(&self, _summary: &RunSummary) {}
    }

    #[tokio::test]
    async fn checkpoint_cadence_applies_to_cache_hits() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path()); // interval 2
        let ids = ["a", "b", "c", "d"];
        let dataset = items(&ids);

        // Seed the cache so every item is a hit: no external calls.
        let mut cache = DedupCache::load(&config.cache_path).unwrap();
        for id in ids {
            cache.record(id, Some(serde_json::json!(1))).unwrap();
        }
        drop(cache);

        let service = MockService::new(vec![]);
        let mut client = RetryClient::new(&service, zero_policy());
        let progress = SnapshotProgress {
            path: config.checkpoint_path.clone(),
            seen: Mutex::new(Vec::new()),
        };

        let summary = run_pipeline(&config, &dataset, &mut client, object_key, &progress)
            .await
            .expect("run");

        assert_eq!(service.total_calls(), 0);
        assert_eq!(summary.skipped, 4);
        assert_eq!(summary.checkpoint.last_processed_index, 3);

        // Items at indexes 2 and 3 are visited after the interval-2
        // save triggered by item index 1.
        let seen = progress.seen.lock().unwrap();
        assert_eq!(*seen, vec![None, None, Some(1), Some(1)]);
    }

    #[tokio::test]
    async fn empty_payload_skips_without_external_call() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let dataset = items(&["blank"]);

        let service = MockService::new(vec![]);
        let mut client = RetryClient::new(&service, zero_policy());
        let summary = run_pipeline(&config, &dataset, &mut client, |_| None, &SilentProgress)
            .await
            .expect("run");

        assert_eq!(service.total_calls(), 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.checkpoint.last_identifier, "blank");
    }
}
