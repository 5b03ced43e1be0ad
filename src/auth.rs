use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::db::KeyBackend;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy)]
struct KeyCacheEntry {
    active: bool,
    expires_at: Instant,
}

/// Validates API keys against the backend, with a short-lived
/// positive/negative cache in front of it. Negative entries damp repeated
/// lookups for junk keys.
#[derive(Clone)]
pub struct KeyStore {
    backend: Arc<dyn KeyBackend>,
    ttl: Duration,
    cache: Arc<RwLock<HashMap<String, KeyCacheEntry>>>,
}

impl KeyStore {
    pub fn new(backend: Arc<dyn KeyBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns whether `key` is known and active. Backend transport errors
    /// propagate unchanged and leave the cache untouched.
    pub async fn validate(&self, key: &str) -> Result<bool> {
        if key.is_empty() {
            return Err(AppError::MissingApiKey);
        }

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(key) {
                if Instant::now() < entry.expires_at {
                    return Ok(entry.active);
                }
            }
        }

        let active = match self.backend.lookup(key).await? {
            Some(record) => record.active,
            None => false,
        };

        let mut cache = self.cache.write().await;
        cache.insert(
            key.to_string(),
            KeyCacheEntry {
                active,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(active)
    }

    /// Writes through to the backend, then installs the new state in the
    /// cache so a prior negative entry is superseded immediately.
    pub async fn upsert(&self, key: &str, active: bool, owner: Option<&str>) -> Result<()> {
        if key.is_empty() {
            return Err(AppError::BadRequest("missing key".to_string()));
        }
        self.backend.upsert(key, active, owner).await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            key.to_string(),
            KeyCacheEntry {
                active,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }
}

/// First 8 hex chars of SHA-256(key), used as a non-reversible log id.
pub fn hash_prefix(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(digest)[..8].to_string()
}

/// 32 random bytes, hex-encoded. The shape of every issued API key.
pub fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeBackend;
    use std::sync::atomic::Ordering;

    fn store(backend: &Arc<FakeBackend>) -> KeyStore {
        KeyStore::new(Arc::clone(backend) as Arc<dyn KeyBackend>, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn positive_result_is_cached() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert("live-key", true).await;
        let keys = store(&backend);

        assert!(keys.validate("live-key").await.unwrap());
        assert!(keys.validate("live-key").await.unwrap());
        assert_eq!(backend.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_is_negatively_cached() {
        let backend = Arc::new(FakeBackend::default());
        let keys = store(&backend);

        assert!(!keys.validate("junk").await.unwrap());
        assert!(!keys.validate("junk").await.unwrap());
        assert_eq!(backend.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upsert_supersedes_negative_entry_without_lookup() {
        let backend = Arc::new(FakeBackend::default());
        let keys = store(&backend);

        assert!(!keys.validate("fresh").await.unwrap());
        keys.upsert("fresh", true, Some("alice")).await.unwrap();
        assert!(keys.validate("fresh").await.unwrap());
        assert_eq!(backend.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inactive_key_validates_false() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert("dormant", false).await;
        let keys = store(&backend);

        assert!(!keys.validate("dormant").await.unwrap());
    }

    #[tokio::test]
    async fn transport_error_propagates_and_is_not_cached() {
        let backend = Arc::new(FakeBackend::default());
        backend.insert("live-key", true).await;
        backend.fail_lookups.store(true, Ordering::SeqCst);
        let keys = store(&backend);

        assert!(keys.validate("live-key").await.is_err());

        backend.fail_lookups.store(false, Ordering::SeqCst);
        assert!(keys.validate("live-key").await.unwrap());
        assert_eq!(backend.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let backend = Arc::new(FakeBackend::default());
        let keys = store(&backend);
        assert!(keys.validate("").await.is_err());
    }

    #[test]
    fn hash_prefix_is_stable_sha256() {
        // sha256("test") = 9f86d081...
        assert_eq!(hash_prefix("test"), "9f86d081");
        assert_eq!(hash_prefix("test").len(), 8);
    }

    #[test]
    fn generated_keys_are_64_hex_chars() {
        let key = generate_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_key(), key);
    }
}
