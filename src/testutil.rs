//! Shared fakes and HTTP helpers for the test modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::Mutex;
use tower::ServiceExt;

use crate::api::{build_router, AppState};
use crate::auth::KeyStore;
use crate::cache::BalanceCache;
use crate::config::Config;
use crate::db::{KeyBackend, KeyRecord};
use crate::error::{AppError, Result};
use crate::rate::LimiterMap;
use crate::solana::{BalanceFetcher, Pubkey, RpcError};

#[derive(Default)]
pub struct FakeBackend {
    pub records: Mutex<HashMap<String, KeyRecord>>,
    pub lookups: AtomicUsize,
    pub fail_lookups: AtomicBool,
    pub fail_ping: AtomicBool,
}

impl FakeBackend {
    pub async fn insert(&self, key: &str, active: bool) {
        self.records.lock().await.insert(
            key.to_string(),
            KeyRecord {
                key: key.to_string(),
                active,
                owner: None,
            },
        );
    }
}

#[async_trait]
impl KeyBackend for FakeBackend {
    async fn lookup(&self, key: &str) -> Result<Option<KeyRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(AppError::Internal("backend unavailable".to_string()));
        }
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn upsert(&self, key: &str, active: bool, owner: Option<&str>) -> Result<()> {
        self.records.lock().await.insert(
            key.to_string(),
            KeyRecord {
                key: key.to_string(),
                active,
                owner: owner.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(AppError::Internal("backend unavailable".to_string()));
        }
        Ok(())
    }
}

pub struct FakeFetcher {
    pub lamports: u64,
    pub delay: Duration,
    pub fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(lamports: u64) -> Self {
        Self::with_delay(lamports, Duration::ZERO)
    }

    pub fn with_delay(lamports: u64, delay: Duration) -> Self {
        Self {
            lamports,
            delay,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BalanceFetcher for FakeFetcher {
    async fn get_balance(
        &self,
        _pubkey: &Pubkey,
    ) -> std::result::Result<(u64, Duration), RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RpcError::Upstream("rpc unavailable".to_string()));
        }
        Ok((self.lamports, Duration::from_millis(5)))
    }
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        helius_rpc_url: String::new(),
        sol_commitment: "finalized".to_string(),
        mongo_uri: "mongodb://localhost:27017".to_string(),
        mongo_db: "solapi".to_string(),
        rate_limit_rpm: 1_000,
        cache_ttl: Duration::from_secs(10),
        key_cache_ttl: Duration::from_secs(60),
        balance_timeout: Duration::from_secs(3),
        max_concurrency: 16,
        admin_token: None,
        public_signup: true,
    }
}

pub struct RouterParts {
    pub router: Router,
    pub backend: Arc<FakeBackend>,
    pub fetcher: Arc<FakeFetcher>,
}

pub fn test_router(config: Config, fetcher: FakeFetcher) -> RouterParts {
    let backend = Arc::new(FakeBackend::default());
    let fetcher = Arc::new(fetcher);

    let state = AppState {
        cache: BalanceCache::new(config.cache_ttl),
        limiter: LimiterMap::new(config.rate_limit_rpm, Duration::from_secs(300)),
        keys: KeyStore::new(
            Arc::clone(&backend) as Arc<dyn KeyBackend>,
            config.key_cache_ttl,
        ),
        fetcher: Arc::clone(&fetcher) as Arc<dyn BalanceFetcher>,
        config,
    };

    RouterParts {
        router: build_router(state),
        backend,
        fetcher,
    }
}

pub fn test_router_with(config: Config) -> RouterParts {
    test_router(config, FakeFetcher::new(2_000_000_000))
}

/// Sends one request through the router and returns status plus parsed JSON
/// body (Null when the body is empty or not JSON).
pub async fn send_json(
    router: &Router,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = if body.is_null() {
        builder.body(Body::empty()).unwrap()
    } else {
        builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}
