//! Signing-key caching with time-based refresh.
//!
//! Each provider owns a [`KeyCache`] holding the current snapshot of its
//! published verification keys. A snapshot is immutable once built; refresh
//! swaps the whole snapshot or leaves the previous one intact on failure, so
//! readers never observe a half-replaced key set.

pub mod jwk;
pub mod pem;

use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::Result;
use crate::fetch::{fetch_with_retry, KeyFetch};

/// Wire format of a provider's published key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyFormat {
    /// JSON Web Key Set (`{"keys": [...]}`).
    JwkSet,
    /// JSON object of named PEM strings (`{"kid": "-----BEGIN ..."}`).
    PemMap,
}

/// An immutable set of verification keys from one completed refresh.
pub struct KeySnapshot {
    keys: HashMap<String, DecodingKey>,
    refreshed_at: Instant,
}

impl std::fmt::Debug for KeySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySnapshot")
            .field("kids", &self.keys.keys().collect::<Vec<_>>())
            .field("refreshed_at", &self.refreshed_at)
            .finish()
    }
}

impl KeySnapshot {
    /// Look up a key by its identifier.
    pub fn get(&self, kid: &str) -> Option<&DecodingKey> {
        self.keys.get(kid)
    }

    /// The sole key in the snapshot, if there is exactly one.
    ///
    /// Used for tokens that carry no `kid` header: with a single published
    /// key there is no ambiguity, with more the token is rejected.
    pub fn sole_key(&self) -> Option<&DecodingKey> {
        if self.keys.len() == 1 {
            self.keys.values().next()
        } else {
            None
        }
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the snapshot holds no keys. Never true for an installed
    /// snapshot; decoding rejects empty sets.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Per-provider cache of verification keys with TTL-based refresh.
pub struct KeyCache {
    /// Key-source URL published by the provider.
    source_url: String,
    /// Wire format of the published key material.
    format: KeyFormat,
    /// How long a snapshot stays fresh.
    refresh_ttl: Duration,
    /// Current snapshot. Swapped atomically under a short write lock;
    /// the fetch itself never runs while this lock is held.
    snapshot: RwLock<Option<Arc<KeySnapshot>>>,
    /// Serializes concurrent refreshes so a TTL expiry triggers one fetch,
    /// not one per in-flight verification.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl KeyCache {
    /// Create an empty cache for the given key source.
    pub fn new(source_url: impl Into<String>, format: KeyFormat, refresh_ttl: Duration) -> Self {
        Self {
            source_url: source_url.into(),
            format,
            refresh_ttl,
            snapshot: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The key-source URL this cache refreshes from.
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// The current snapshot regardless of freshness, if any refresh has
    /// ever succeeded.
    pub fn current(&self) -> Option<Arc<KeySnapshot>> {
        // A panic elsewhere cannot corrupt the snapshot (single pointer
        // swap), so a poisoned lock is recovered rather than propagated.
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return a fresh snapshot, refreshing from the key source if the TTL
    /// has elapsed.
    ///
    /// Within the TTL this is a pure cache hit with no I/O. On expiry one
    /// caller performs the fetch while concurrent callers wait on the gate
    /// and then reuse the freshly installed snapshot. Fetch and decode
    /// failures leave the previous snapshot untouched and propagate.
    pub async fn ensure_fresh(&self, fetcher: &dyn KeyFetch) -> Result<Arc<KeySnapshot>> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }

        let _gate = self.refresh_gate.lock().await;

        // Re-check: another caller may have refreshed while we waited.
        if let Some(snapshot) = self.fresh_snapshot() {
            debug!(url = %self.source_url, "key refresh already completed by concurrent caller");
            return Ok(snapshot);
        }

        debug!(url = %self.source_url, "refreshing provider keys");
        let body = fetch_with_retry(fetcher, &self.source_url).await?;

        let keys = match self.format {
            KeyFormat::JwkSet => jwk::decode_jwk_set(&body)?,
            KeyFormat::PemMap => pem::decode_pem_map(&body)?,
        };

        let snapshot = Arc::new(KeySnapshot {
            keys,
            refreshed_at: Instant::now(),
        });

        info!(
            url = %self.source_url,
            key_count = snapshot.len(),
            "provider keys refreshed"
        );

        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        Ok(snapshot)
    }

    fn fresh_snapshot(&self) -> Option<Arc<KeySnapshot>> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|s| s.refreshed_at.elapsed() < self.refresh_ttl)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::fetch::FetchError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedFetcher {
        script: Mutex<Vec<std::result::Result<Vec<u8>, FetchError>>>,
        calls: AtomicU32,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<std::result::Result<Vec<u8>, FetchError>>) -> Self {
            let mut script = script;
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeyFetch for ScriptedFetcher {
        async fn fetch(&self, _url: &str) -> std::result::Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(FetchError::Timeout { attempts: 1 }))
        }
    }

    fn jwks_body() -> Vec<u8> {
        json!({
            "keys": [
                {"kty": "OKP", "crv": "Ed25519", "kid": "kid-1",
                 "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"}
            ]
        })
        .to_string()
        .into_bytes()
    }

    fn cache(ttl_secs: u64) -> KeyCache {
        KeyCache::new(
            "https://idp.example/keys",
            KeyFormat::JwkSet,
            Duration::from_secs(ttl_secs),
        )
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_is_a_cache_hit() {
        let fetcher = ScriptedFetcher::new(vec![Ok(jwks_body())]);
        let cache = cache(3600);

        let first = cache.ensure_fresh(&fetcher).await.unwrap();
        let second = cache.ensure_fresh(&fetcher).await.unwrap();

        assert_eq!(fetcher.calls(), 1, "second call must not fetch");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_refresh_succeeds_on_third_attempt() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::Timeout { attempts: 1 }),
            Err(FetchError::Timeout { attempts: 1 }),
            Ok(jwks_body()),
        ]);
        let cache = cache(3600);

        let snapshot = cache.ensure_fresh(&fetcher).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(fetcher.calls(), 3);
        assert!(cache.current().is_some(), "refresh must record the snapshot");
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let fetcher = ScriptedFetcher::new(vec![Ok(jwks_body())]);
        let cache = cache(0); // every call is past the TTL

        let first = cache.ensure_fresh(&fetcher).await.unwrap();

        let failing = ScriptedFetcher::new(vec![
            Err(FetchError::Timeout { attempts: 1 }),
            Err(FetchError::Timeout { attempts: 1 }),
            Err(FetchError::Timeout { attempts: 1 }),
        ]);
        let err = cache.ensure_fresh(&failing).await.unwrap_err();
        assert!(matches!(err, AuthError::KeyFetch(_)));

        let stale = cache.current().expect("previous snapshot must survive");
        assert!(Arc::ptr_eq(&first, &stale));
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_previous_snapshot() {
        let fetcher = ScriptedFetcher::new(vec![Ok(jwks_body()), Ok(b"not json".to_vec())]);
        let cache = cache(0);

        cache.ensure_fresh(&fetcher).await.unwrap();
        let err = cache.ensure_fresh(&fetcher).await.unwrap_err();
        assert!(matches!(err, AuthError::KeyDecode(_)));
        assert!(cache.current().is_some());
    }

    #[tokio::test]
    async fn test_first_refresh_failure_leaves_cache_empty() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(FetchError::Timeout { attempts: 1 }),
            Err(FetchError::Timeout { attempts: 1 }),
            Err(FetchError::Timeout { attempts: 1 }),
        ]);
        let cache = cache(3600);

        let err = cache.ensure_fresh(&fetcher).await.unwrap_err();
        assert!(matches!(err, AuthError::KeyFetch(FetchError::Timeout { attempts: 3 })));
        assert!(cache.current().is_none());
    }

    #[tokio::test]
    async fn test_poisoned_snapshot_lock_is_recovered() {
        let fetcher = ScriptedFetcher::new(vec![Ok(jwks_body())]);
        let cache = cache(3600);
        cache.ensure_fresh(&fetcher).await.unwrap();

        let poisoner = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = cache.snapshot.write().unwrap();
            panic!("poison the snapshot lock");
        }));
        assert!(poisoner.is_err());

        assert!(cache.current().is_some());
        assert!(cache.ensure_fresh(&fetcher).await.is_ok());
    }

    #[tokio::test]
    async fn test_sole_key_lookup() {
        let fetcher = ScriptedFetcher::new(vec![Ok(jwks_body())]);
        let cache = cache(3600);
        let snapshot = cache.ensure_fresh(&fetcher).await.unwrap();
        assert!(snapshot.sole_key().is_some());
        assert!(snapshot.get("kid-1").is_some());
        assert!(snapshot.get("other").is_none());
    }
}
