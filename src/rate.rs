use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ConnectInfo;
use axum::http::Request;
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;

/// Token bucket refilled continuously; capacity equals the burst size.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    burst: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rpm: u32) -> Self {
        Self {
            tokens: rpm as f64,
            burst: rpm as f64,
            refill_per_sec: rpm as f64 / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.burst);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct LimiterEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Per-IP admission control with a background reaper for idle entries.
#[derive(Clone)]
pub struct LimiterMap {
    entries: Arc<Mutex<HashMap<String, LimiterEntry>>>,
    rpm: u32,
    stop: Arc<Notify>,
}

impl LimiterMap {
    /// Creates the map and spawns the reaper, which wakes every `ttl` and
    /// drops entries idle for longer than `ttl`. Eviction is purely for
    /// memory; a fresh entry starts with a full bucket.
    pub fn new(rpm: u32, ttl: Duration) -> Self {
        let lm = Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            rpm,
            stop: Arc::new(Notify::new()),
        };

        let entries = Arc::clone(&lm.entries);
        let stop = Arc::clone(&lm.stop);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(ttl);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let now = Instant::now();
                        let mut map = entries.lock().await;
                        map.retain(|_, entry| now.duration_since(entry.last_seen) <= ttl);
                    }
                    _ = stop.notified() => break,
                }
            }
        });

        lm
    }

    /// Non-blocking admission verdict for one request from `ip`.
    pub async fn allow(&self, ip: &str) -> bool {
        let mut map = self.entries.lock().await;
        let entry = map.entry(ip.to_string()).or_insert_with(|| LimiterEntry {
            bucket: TokenBucket::new(self.rpm),
            last_seen: Instant::now(),
        });
        entry.last_seen = Instant::now();
        entry.bucket.allow()
    }

    /// Signals the reaper to exit. `allow` stays safe afterwards; the map
    /// simply stops evicting.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Resolves the client IP: first comma-separated token of `X-Forwarded-For`
/// verbatim if present, otherwise the peer address.
pub fn client_ip<B>(req: &Request<B>) -> String {
    if let Some(xff) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if !xff.is_empty() {
            return xff.split(',').next().unwrap_or(xff).to_string();
        }
    }
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    "unknown".to_string()
}
