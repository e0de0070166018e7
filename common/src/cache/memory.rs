use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// In-process fallback for deployments without Redis. Entries share the
/// serialized-JSON representation with the Redis backend so the two are
/// interchangeable behind the facade.
#[derive(Clone, Default)]
pub struct MemorySessionCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

struct Entry {
    payload: String,
    expires_at: Instant,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_raw(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn set_raw(&self, key: &str, payload: String, ttl: Duration) {
        let entry = Entry {
            payload,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    pub async fn delete_raw(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}
