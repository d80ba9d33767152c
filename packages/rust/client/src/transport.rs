//! HTTP transports implementing the external service boundary.
//!
//! Both transports own a long-lived `reqwest::Client` (the reused
//! session) and translate HTTP/transport results into the five outcome
//! classes the retry policy understands. They never return errors:
//! everything folds into a [`CallOutcome`].

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use curio_shared::config::{CollectionApiConfig, EmbeddingConfig};
use curio_shared::{CurioError, Result};

use crate::outcome::{CallOutcome, CallPayload};

/// User-Agent string for outbound requests.
const USER_AGENT: &str = concat!("Curio/", env!("CARGO_PKG_VERSION"));

/// Cool-down assumed when a rate-limit response omits `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// One external call: `call(payload) -> structured outcome`.
///
/// The pipeline treats the service as opaque; implementations decide
/// how a payload becomes a request and how a response maps onto the
/// outcome classes.
pub trait CollectionService {
    fn call(&self, payload: &CallPayload) -> impl Future<Output = CallOutcome> + Send;
}

// ---------------------------------------------------------------------------
// Shared response mapping
// ---------------------------------------------------------------------------

/// Map a completed HTTP response onto the outcome taxonomy.
async fn classify_response(response: reqwest::Response) -> CallOutcome {
    let status = response.status();

    match status {
        StatusCode::OK => match response.json::<serde_json::Value>().await {
            Ok(value) => CallOutcome::Ok(value),
            Err(e) => CallOutcome::Transient(format!("response parse failed: {e}")),
        },
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            CallOutcome::RateLimited {
                retry_after: Some(retry_after),
            }
        }
        // 403 in the wild is almost always throttling without a stated
        // interval: the soft-block path.
        StatusCode::FORBIDDEN => CallOutcome::RateLimited { retry_after: None },
        StatusCode::NOT_FOUND => CallOutcome::NotFound,
        _ => CallOutcome::Transient(format!("HTTP {status}")),
    }
}

/// Fold a reqwest transport error into the taxonomy.
fn classify_transport_error(e: reqwest::Error) -> CallOutcome {
    if e.is_timeout() {
        CallOutcome::Transient("request timeout".into())
    } else if e.is_connect() {
        CallOutcome::Transient(format!("connection error: {e}"))
    } else {
        CallOutcome::Transient(format!("request error: {e}"))
    }
}

// ---------------------------------------------------------------------------
// CollectionApi
// ---------------------------------------------------------------------------

/// Public collection API: identifier-keyed object metadata lookups
/// (`GET {base}/objects/{id}`).
#[derive(Debug, Clone)]
pub struct CollectionApi {
    client: Client,
    base_url: String,
}

impl CollectionApi {
    pub fn new(config: &CollectionApiConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CurioError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl CollectionService for CollectionApi {
    async fn call(&self, payload: &CallPayload) -> CallOutcome {
        let object_id = match payload {
            CallPayload::ObjectKey(id) => id,
            other => {
                return CallOutcome::Transient(format!(
                    "collection API expects an object key, got {other:?}"
                ));
            }
        };

        let url = format!("{}/objects/{object_id}", self.base_url);
        debug!(%url, "collection API request");

        match self.client.get(&url).send().await {
            Ok(response) => classify_response(response).await,
            Err(e) => classify_transport_error(e),
        }
    }
}

// ---------------------------------------------------------------------------
// EmbeddingApi
// ---------------------------------------------------------------------------

/// Remote embedding service: text or image in, per-model vectors out.
#[derive(Debug, Clone)]
pub struct EmbeddingApi {
    client: Client,
    endpoint: String,
    device: String,
}

impl EmbeddingApi {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(CurioError::config(
                "embedding endpoint not set. Add [embedding] endpoint to curio.toml",
            ));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CurioError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            device: config.device.clone(),
        })
    }
}

impl CollectionService for EmbeddingApi {
    async fn call(&self, payload: &CallPayload) -> CallOutcome {
        let request = match payload {
            CallPayload::Text(text) => self.client.post(&self.endpoint).json(
                &serde_json::json!({ "text": text, "device": self.device }),
            ),
            CallPayload::ImageBytes(bytes) => self
                .client
                .post(&self.endpoint)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes.clone()),
            CallPayload::ObjectKey(_) => {
                return CallOutcome::Transient(
                    "embedding service expects text or image payload".into(),
                );
            }
        };

        debug!(endpoint = %self.endpoint, "embedding service request");

        match request.send().await {
            Ok(response) => classify_response(response).await,
            Err(e) => classify_transport_error(e),
        }
    }
}
