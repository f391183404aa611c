//! Plan cache
//!
//! Identical planning requests within the TTL reuse the previous backend
//! response instead of spending a rate-limit slot. Keys are a sha256 over
//! the task kind, payload, and context digest, so any change in context
//! produces a fresh plan.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct PlanCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl PlanCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache key for a planning request.
    pub fn key(task_kind: &str, payload: &serde_json::Value, context_digest: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(task_kind.as_bytes());
        hasher.update(b"|");
        hasher.update(payload.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(context_digest.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns the cached raw response if present and not expired.
    pub async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((stored_at, response)) if stored_at.elapsed() < self.ttl => {
                debug!(key, "plan cache hit");
                Some(response.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores a raw backend response, evicting anything expired.
    pub async fn put(&self, key: String, response: String) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), response));
    }
}
