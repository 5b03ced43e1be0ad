use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};

/// Balance fetched from the upstream RPC, immutable once stored.
#[derive(Debug, Clone)]
pub struct CachedBalance {
    pub lamports: u64,
    pub fetched_at: DateTime<Utc>,
}

/// Which path served a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cache,
    Rpc,
}

/// Fetch failure shared by every caller attached to the same in-flight fetch.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct FetchError(pub String);

type FlightResult = std::result::Result<CachedBalance, FetchError>;

struct Entry {
    value: CachedBalance,
    expires_at: Instant,
}

struct Inner {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
    in_flight: Mutex<HashMap<String, broadcast::Sender<FlightResult>>>,
}

/// TTL cache with per-key coalescing of concurrent misses.
#[derive(Clone)]
pub struct BalanceCache {
    inner: Arc<Inner>,
}

impl BalanceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                ttl,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns a cached value if still valid; otherwise coalesces concurrent
    /// fetches for the same key so the upstream sees at most one call.
    ///
    /// The fetch runs in a detached task: a timed-out or disconnected caller
    /// must not cancel a fetch other waiters share. Errors are broadcast to
    /// every waiter and nothing is stored, so the next call re-enters the
    /// fetch path.
    pub async fn get_or_fetch<F>(
        &self,
        key: &str,
        fetch: F,
    ) -> std::result::Result<(CachedBalance, Source), FetchError>
    where
        F: Future<Output = FlightResult> + Send + 'static,
    {
        // fast path: non-expired entry
        {
            let entries = self.inner.entries.read().await;
            if let Some(entry) = entries.get(key) {
                if Instant::now() < entry.expires_at {
                    return Ok((entry.value.clone(), Source::Cache));
                }
            }
        }

        let mut rx = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.get(key) {
                Some(tx) => tx.subscribe(),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    in_flight.insert(key.to_string(), tx);

                    let inner = Arc::clone(&self.inner);
                    let key = key.to_string();
                    tokio::spawn(async move {
                        let result = fetch.await;
                        if let Ok(value) = &result {
                            let mut entries = inner.entries.write().await;
                            entries.insert(
                                key.clone(),
                                Entry {
                                    value: value.clone(),
                                    expires_at: Instant::now() + inner.ttl,
                                },
                            );
                        }
                        // remove-then-send under the lock so late arrivals
                        // either hear this result or start a fresh flight
                        let mut in_flight = inner.in_flight.lock().await;
                        if let Some(tx) = in_flight.remove(&key) {
                            let _ = tx.send(result);
                        }
                    });
                    rx
                }
            }
        };

        match rx.recv().await {
            Ok(result) => result.map(|value| (value, Source::Rpc)),
            Err(_) => Err(FetchError("in-flight fetch dropped".to_string())),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }
}
