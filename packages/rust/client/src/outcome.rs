//! Outcome taxonomy for external calls.
//!
//! The pipeline recognizes exactly five outcome classes from the
//! transport layer; everything a service or the network can do is
//! folded into one of them before the retry policy sees it.

use std::time::Duration;

/// Input for one external call.
///
/// The identifier travels separately (logging/correlation only); the
/// payload carries whatever the transport needs to build the request.
#[derive(Debug, Clone)]
pub enum CallPayload {
    /// Composed text to embed.
    Text(String),
    /// Numeric-ish object key for identifier-keyed API lookups.
    ObjectKey(String),
    /// Raw image bytes for visual embedding.
    ImageBytes(Vec<u8>),
}

/// What one attempt against the external service produced.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// Usable structured response.
    Ok(serde_json::Value),
    /// Explicit rate-limit signal. `retry_after` carries the
    /// service-provided cool-down when one was given; `None` is a soft
    /// block that triggers the escalating session penalty.
    RateLimited { retry_after: Option<Duration> },
    /// The service affirmatively reports the item does not exist.
    /// A domain outcome, not a transport error — never retried.
    NotFound,
    /// Timeout, connection error, parse failure, or generic 5xx.
    Transient(String),
}

impl CallOutcome {
    /// Short class tag for log lines.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Ok(_) => "ok",
            Self::RateLimited { retry_after: Some(_) } => "rate-limited",
            Self::RateLimited { retry_after: None } => "soft-blocked",
            Self::NotFound => "not-found",
            Self::Transient(_) => "transient",
        }
    }
}

/// Final result of [`crate::RetryClient::fetch_or_compute`].
///
/// Deliberately not a `Result`: none of these variants is an error that
/// should abort the run, and the guarantee is that nothing else ever
/// crosses the client boundary.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The call produced a usable result.
    Fetched(serde_json::Value),
    /// Terminal failure — skip permanently, do not retry.
    NotFound,
    /// All attempts consumed without success.
    Exhausted,
}

impl FetchOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self, Self::Fetched(_))
    }
}
