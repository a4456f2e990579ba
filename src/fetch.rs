//! Key-material fetching with bounded retries.
//!
//! The fetch itself is a capability: [`KeyFetch`] performs exactly one
//! attempt, and [`fetch_with_retry`] layers the retry/backoff policy on top.
//! Key refresh takes the fetcher as a trait object, so tests substitute a
//! scripted stub without any network access.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum fetch attempts per refresh.
pub const MAX_ATTEMPTS: u32 = 3;

/// Wall-clock bound on a single fetch attempt.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// A single failed fetch attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The attempt exceeded its per-attempt timeout. Transient: retried
    /// immediately with no backoff sleep.
    #[error("timed out after {attempts} attempt(s)")]
    Timeout {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// A non-timeout transport failure. Not retried.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// The endpoint answered with a non-2xx status. Transient: retried after
    /// a linearly escalating sleep.
    #[error("unexpected status {status} after {attempts} attempt(s)")]
    Status {
        /// HTTP status code of the last response.
        status: u16,
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// One fetch attempt against a key-source URL.
///
/// Implementations must bound each attempt themselves (the HTTP
/// implementation uses a client timeout of [`ATTEMPT_TIMEOUT`]).
#[async_trait]
pub trait KeyFetch: Send + Sync {
    /// Fetch the raw body published at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetch `url` with up to [`MAX_ATTEMPTS`] attempts.
///
/// Timeouts retry immediately; non-2xx responses sleep `attempt_index`
/// seconds before the next attempt; any other transport error aborts at
/// once. When the budget is exhausted the last transient error is returned
/// with the attempt count folded in.
pub async fn fetch_with_retry(fetcher: &dyn KeyFetch, url: &str) -> Result<Vec<u8>, FetchError> {
    let mut last_err = None;

    for attempt in 0..MAX_ATTEMPTS {
        match fetcher.fetch(url).await {
            Ok(body) => {
                debug!(url = %url, attempt, "key fetch succeeded");
                return Ok(body);
            }
            Err(FetchError::Timeout { .. }) => {
                warn!(url = %url, attempt, "key fetch attempt timed out");
                last_err = Some(FetchError::Timeout {
                    attempts: attempt + 1,
                });
            }
            Err(FetchError::Status { status, .. }) => {
                warn!(url = %url, attempt, status, "key fetch got unexpected status");
                last_err = Some(FetchError::Status {
                    status,
                    attempts: attempt + 1,
                });
                if attempt + 1 < MAX_ATTEMPTS {
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                }
            }
            Err(err @ FetchError::Transport(_)) => {
                warn!(url = %url, attempt, error = %err, "key fetch transport error, aborting");
                return Err(err);
            }
        }
    }

    // last_err is always set when the loop completes without returning.
    Err(last_err.unwrap_or(FetchError::Timeout {
        attempts: MAX_ATTEMPTS,
    }))
}

/// HTTP fetcher backed by `reqwest`.
pub struct HttpKeyFetcher {
    client: reqwest::Client,
}

impl HttpKeyFetcher {
    /// Create a fetcher whose attempts are bounded by [`ATTEMPT_TIMEOUT`].
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl KeyFetch for HttpKeyFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout { attempts: 1 }
            } else {
                FetchError::Transport(e.into())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                attempts: 1,
            });
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout { attempts: 1 }
            } else {
                FetchError::Transport(e.into())
            }
        })?;

        Ok(body.to_vec())
    }
}
