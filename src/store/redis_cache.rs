//! Redis implementation of the cache store.
//!
//! Leaderboards live in sorted sets, quiz content in plain string keys. One
//! multiplexed connection is shared by every caller.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::error::Result;
use crate::store::CacheStore;

#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis cache at {}", redis_url);
        Ok(Self { conn })
    }
}

/// Redis expiries are whole seconds; never round a positive TTL down to zero.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        debug!("🗑️ Deleted cache key: {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn replace_sorted(&self, key: &str, members: &[(String, f64)], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        for (member, score) in members {
            pipe.zadd(key, member, *score).ignore();
        }
        pipe.expire(key, ttl_secs(ttl) as i64).ignore();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn read_sorted_desc(&self, key: &str) -> Result<Vec<(String, f64)>> {
        let mut conn = self.conn.clone();
        let members: Vec<(String, f64)> = conn.zrevrange_withscores(key, 0, -1).await?;
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_second_ttl_rounds_up() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(3600)), 3600);
    }
}
