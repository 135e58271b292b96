// src/cache.rs
use moka::future::Cache;
use moka::Expiry;
use serde_json::Value;
use std::time::{Duration, Instant};

pub const DEFAULT_CAPACITY: u64 = 10_000;

#[derive(Clone)]
struct CachedBody {
    ttl: Duration,
    body: Value,
}

/// Each entry expires after the window it was inserted with.
struct PerEntryTtl;

impl Expiry<String, CachedBody> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedBody,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// URL-keyed store of upstream JSON bodies, bounded in size.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Cache<String, CachedBody>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ResponseCache {
    pub fn new(max_capacity: u64) -> Self {
        ResponseCache {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.get(key).await.map(|cached| cached.body)
    }

    pub async fn insert(&self, key: String, body: Value, ttl: Duration) {
        self.inner.insert(key, CachedBody { ttl, body }).await;
    }

    /// Approximate until pending maintenance has run.
    pub fn len(&self) -> u64 {
        self.inner.entry_count()
    }

    #[cfg(test)]
    async fn settle(&self) {
        self.inner.run_pending_tasks().await;
    }
}
