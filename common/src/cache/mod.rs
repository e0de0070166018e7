use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::AppError;
use crate::utils::config::AppConfig;

mod memory;
mod redis;

pub use memory::MemorySessionCache;
pub use redis::RedisSessionCache;

/// Key under which a conversation session is cached for one caller.
pub fn session_key(subject: &str, conversation_id: &str) -> String {
    format!("{subject}__{conversation_id}")
}

/// Session cache facade over Redis with an in-process fallback.
///
/// Values are stored as JSON so both backends behave identically. A payload
/// that no longer deserializes is treated as a miss rather than an error;
/// callers rebuild the session from the database in that case.
#[derive(Clone)]
pub enum SessionCache {
    Redis(RedisSessionCache),
    Memory(MemorySessionCache),
}

impl SessionCache {
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, AppError> {
        match cfg.redis_url.as_deref() {
            Some(url) => Ok(Self::Redis(RedisSessionCache::connect(url).await?)),
            None => {
                warn!("redis_url not configured, falling back to in-process session cache");
                Ok(Self::Memory(MemorySessionCache::new()))
            }
        }
    }

    pub fn memory() -> Self {
        Self::Memory(MemorySessionCache::new())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let raw = match self {
            Self::Redis(cache) => cache.get_raw(key).await?,
            Self::Memory(cache) => cache.get_raw(key).await,
        };

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                warn!(%key, %error, "Discarding unreadable session payload");
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let payload = serde_json::to_string(value)?;
        match self {
            Self::Redis(cache) => cache.set_raw(key, &payload, ttl).await?,
            Self::Memory(cache) => cache.set_raw(key, payload, ttl).await,
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), AppError> {
        match self {
            Self::Redis(cache) => cache.delete_raw(key).await?,
            Self::Memory(cache) => cache.delete_raw(key).await,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Session {
        description: String,
        turns: u32,
    }

    #[tokio::test]
    async fn round_trips_typed_values() {
        let cache = SessionCache::memory();
        let session = Session {
            description: "early adopters".to_string(),
            turns: 3,
        };

        cache
            .set("user__conv1", &session, Duration::from_secs(60))
            .await
            .expect("set");

        let loaded: Option<Session> = cache.get("user__conv1").await.expect("get");
        assert_eq!(loaded, Some(session));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let cache = SessionCache::memory();
        let loaded: Option<Session> = cache.get("user__absent").await.expect("get");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn unreadable_payload_is_a_miss() {
        let cache = SessionCache::memory();
        // Store a shape that doesn't match the requested type.
        cache
            .set("user__conv1", &"just a string", Duration::from_secs(60))
            .await
            .expect("set");

        let loaded: Option<Session> = cache.get("user__conv1").await.expect("get");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn delete_drops_the_session() {
        let cache = SessionCache::memory();
        let session = Session {
            description: "settlers".to_string(),
            turns: 1,
        };

        let key = session_key("user", "conv1");
        cache
            .set(&key, &session, Duration::from_secs(60))
            .await
            .expect("set");
        cache.delete(&key).await.expect("delete");

        let loaded: Option<Session> = cache.get(&key).await.expect("get");
        assert!(loaded.is_none());
    }

    #[test]
    fn session_key_joins_subject_and_conversation() {
        assert_eq!(session_key("alice", "abc123"), "alice__abc123");
    }
}
