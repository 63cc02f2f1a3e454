use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use event_log::{EventEntry, EventKind, EventSink};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;

use crate::message::{Delivery, DeliveryRecord};
use crate::session::DeliveryHandler;

/// Default bound on one request/response exchange with the target.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest response excerpt reported in verbose mode, in characters.
const RESPONSE_EXCERPT_CHARS: usize = 200;

/// Most bytes of a response body read in verbose mode.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Headers that describe the relay hop and must not be replayed.
const SKIPPED_HEADERS: [&str; 2] = ["host", "content-length"];

/// Errors produced while replaying a single delivery.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("{}", describe(.0))]
    Request(#[from] reqwest::Error),
}

/// Settings for the [`Forwarder`].
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Base URL deliveries are replayed against, e.g. `http://localhost:3000`.
    pub target_base: String,
    /// Include an excerpt of each response body in `webhook_forwarded` events.
    pub verbose: bool,
    /// Bound on the whole exchange, response body included.
    pub timeout: Duration,
}

/// Replays deliveries as HTTP requests against the target.
///
/// Cloning is cheap; every clone shares one connection pool. Each dispatched
/// delivery runs on its own task which nothing waits on, so delivery is
/// at-most-once: a failed forward is logged as `forward_error` and dropped.
#[derive(Clone)]
pub struct Forwarder {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    target_base: String,
    verbose: bool,
    events: EventSink,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig, events: EventSink) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                target_base: config.target_base,
                verbose: config.verbose,
                events,
            }),
        })
    }

    /// Replay one delivery and record the outcome in the event stream.
    ///
    /// Never fails: errors end up as `forward_error` events.
    pub async fn forward(&self, delivery: Delivery) {
        let Delivery {
            record,
            balance_sats,
        } = delivery;

        let outcome = self.send(&record).await;

        let entry = match outcome {
            Ok((status, response)) => {
                tracing::info!(
                    method = %record.method,
                    path = %record.path,
                    status,
                    "webhook forwarded"
                );
                let entry = EventEntry::new(EventKind::WebhookForwarded).with_status_code(status);
                match response {
                    Some(excerpt) => entry.with_response(excerpt),
                    None => entry,
                }
            }
            Err(err) => {
                tracing::warn!(
                    method = %record.method,
                    path = %record.path,
                    %err,
                    "forward failed"
                );
                EventEntry::new(EventKind::ForwardError).with_error(err.to_string())
            }
        };

        self.inner
            .events
            .log(
                entry
                    .with_request(record.method, record.path)
                    .with_balance_sats(balance_sats),
            )
            .await;
    }

    async fn send(&self, record: &DeliveryRecord) -> Result<(u16, Option<String>), ForwardError> {
        let method = parse_method(&record.method)?;
        let url = target_url(&self.inner.target_base, &record.path);

        let response = self
            .inner
            .client
            .request(method, url)
            .headers(replay_headers(&record.headers))
            .body(record.body.clone())
            .send()
            .await?;

        let status = response.status().as_u16();

        let excerpt = if self.inner.verbose {
            let body = read_bounded(response, MAX_RESPONSE_BYTES).await;
            (!body.is_empty())
                .then(|| truncate(&String::from_utf8_lossy(&body), RESPONSE_EXCERPT_CHARS))
        } else {
            None
        };

        Ok((status, excerpt))
    }
}

impl DeliveryHandler for Forwarder {
    fn dispatch(&self, delivery: Delivery) {
        let forwarder = self.clone();
        tokio::spawn(async move {
            forwarder.forward(delivery).await;
        });
    }
}

/// Where a delivery is replayed: the base itself for an empty or root path,
/// otherwise the base (minus one trailing `/`) followed by the path verbatim.
pub fn target_url(base: &str, path: &str) -> String {
    if path.is_empty() || path == "/" {
        return base.to_string();
    }
    let base = base.strip_suffix('/').unwrap_or(base);
    format!("{base}{path}")
}

/// Parse the relay's serialised header object into request headers.
///
/// `Host` and `Content-Length` are dropped in any letter case. A header field
/// that is not a string-to-string JSON object yields no headers at all; single
/// entries that are not legal HTTP are skipped.
pub fn replay_headers(raw: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let parsed: HashMap<String, String> = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            if !raw.is_empty() {
                tracing::debug!(%err, "delivery headers are not a JSON object; sending none");
            }
            return headers;
        }
    };

    for (name, value) in parsed {
        if SKIPPED_HEADERS
            .iter()
            .any(|skipped| name.eq_ignore_ascii_case(skipped))
        {
            continue;
        }

        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::debug!(header = %name, "skipping header that is not valid HTTP"),
        }
    }

    headers
}

/// Cut `text` to `max_chars` characters, marking the cut with `...`.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

/// An empty method means `GET`, as for any HTTP client default.
fn parse_method(raw: &str) -> Result<Method, ForwardError> {
    if raw.is_empty() {
        return Ok(Method::GET);
    }
    Method::from_bytes(raw.as_bytes()).map_err(|_| ForwardError::InvalidMethod(raw.to_string()))
}

/// Read at most `limit` bytes of the body. A failed read keeps what arrived.
async fn read_bounded(mut response: reqwest::Response, limit: usize) -> Vec<u8> {
    let mut body = Vec::new();

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let room = limit - body.len();
                body.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if body.len() >= limit {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(err = %describe(&err), "failed to read response body");
                break;
            }
        }
    }

    body
}

/// Render an error with its source chain, e.g.
/// `error sending request: client error (Connect): connection refused`.
fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
