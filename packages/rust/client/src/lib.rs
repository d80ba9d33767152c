//! Rate-limited retrying client for slow/unreliable external services.
//!
//! The client wraps a single external call ([`CollectionService::call`])
//! with bounded retries, exponential backoff, and two distinct
//! rate-limit throttle paths (header-provided cool-down vs. escalating
//! soft-block penalty). Transport and parse failures never escape
//! [`RetryClient::fetch_or_compute`] — every call folds into one of
//! three outcomes: fetched, terminally absent, or retries exhausted.

pub mod outcome;
pub mod retry;
pub mod transport;

pub use outcome::{CallOutcome, CallPayload, FetchOutcome};
pub use retry::{Action, RetryClient, RetryPolicy, backoff_delay, next_action, soft_block_penalty};
pub use transport::{CollectionApi, CollectionService, EmbeddingApi};
