use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::AppError;

/// Redis-backed session store. The connection manager reconnects on its own,
/// so a clone per command is all that is needed.
#[derive(Clone)]
pub struct RedisSessionCache {
    conn: ConnectionManager,
}

impl RedisSessionCache {
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    pub async fn set_raw(&self, key: &str, payload: &str, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, payload, ttl.as_secs()).await?;
        Ok(())
    }

    pub async fn delete_raw(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
