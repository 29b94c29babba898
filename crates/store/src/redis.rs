//! Redis implementation of [`SortedStore`] using fred.
//!
//! One shared, already-connected client handle is constructed at startup
//! and injected into every component that needs the store. All primitives
//! map one-to-one onto Redis commands; `del_if_eq` uses the classic
//! compare-and-delete script so pointer cleanup stays atomic.

use async_trait::async_trait;
use clickrush_common::{AppError, AppResult};
use fred::clients::Client as RedisClient;
use fred::interfaces::{ClientLike, KeysInterface, LuaInterface, SortedSetsInterface};
use fred::types::Expiration;
use fred::types::config::Config as RedisConfig;
use tracing::info;

use crate::SortedStore;

/// Compare-and-delete: delete KEYS[1] only if it currently holds ARGV[1].
const DEL_IF_EQ_SCRIPT: &str = r"if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end";

/// Pop the lowest member of KEYS[1] and add it to KEYS[2] scored ARGV[1].
const POP_MIN_MOVE_SCRIPT: &str = r"local popped = redis.call('ZPOPMIN', KEYS[1])
if popped[1] == nil then
  return false
end
redis.call('ZADD', KEYS[2], ARGV[1], popped[1])
return popped[1]";

/// Trim KEYS[1] up to ARGV[1], count, add ARGV[3] scored ARGV[2], expire
/// after ARGV[4] seconds. Returns the count taken before the add.
const WINDOW_ADD_SCRIPT: &str = r"redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[3])
redis.call('EXPIRE', KEYS[1], ARGV[4])
return count";

/// Redis-backed [`SortedStore`].
#[derive(Clone)]
pub struct RedisStore {
    client: RedisClient,
}

impl RedisStore {
    /// Connect to Redis and return a ready store handle.
    pub async fn connect(url: &str) -> AppResult<Self> {
        let config = RedisConfig::from_url(url).map_err(store_err)?;
        let client = RedisClient::new(config, None, None, None);
        client.init().await.map_err(store_err)?;

        info!("Connected to Redis backing store");
        Ok(Self { client })
    }

    /// Wrap an already-connected client.
    #[must_use]
    pub const fn from_client(client: RedisClient) -> Self {
        Self { client }
    }
}

fn store_err(e: fred::error::Error) -> AppError {
    AppError::Store(e.to_string())
}

#[async_trait]
impl SortedStore for RedisStore {
    async fn zadd(&self, key: &str, score: f64, member: &str) -> AppResult<()> {
        self.client
            .zadd::<(), _, _>(key, None, None, false, false, (score, member))
            .await
            .map_err(store_err)
    }

    async fn zcard(&self, key: &str) -> AppResult<u64> {
        self.client.zcard::<u64, _>(key).await.map_err(store_err)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<u64>,
    ) -> AppResult<Vec<(String, f64)>> {
        let limit = limit.map(|l| (0, i64::try_from(l).unwrap_or(i64::MAX)));
        self.client
            .zrangebyscore::<Vec<(String, f64)>, _, _, _>(key, min, max, true, limit)
            .await
            .map_err(store_err)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> AppResult<u64> {
        self.client
            .zremrangebyscore::<u64, _, _, _>(key, min, max)
            .await
            .map_err(store_err)
    }

    async fn zrem(&self, key: &str, member: &str) -> AppResult<bool> {
        let removed: u64 = self
            .client
            .zrem(key, member)
            .await
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    async fn zpop_min(&self, key: &str) -> AppResult<Option<(String, f64)>> {
        let popped: Vec<(String, f64)> = self
            .client
            .zpopmin(key, Some(1))
            .await
            .map_err(store_err)?;
        Ok(popped.into_iter().next())
    }

    async fn zpop_min_move(
        &self,
        src: &str,
        dst: &str,
        dst_score: f64,
    ) -> AppResult<Option<String>> {
        let moved: Option<String> = self
            .client
            .eval(POP_MIN_MOVE_SCRIPT, vec![src, dst], dst_score.to_string())
            .await
            .map_err(store_err)?;
        Ok(moved)
    }

    async fn zwindow_add(
        &self,
        key: &str,
        cutoff: f64,
        score: f64,
        member: &str,
        ttl_secs: i64,
    ) -> AppResult<u64> {
        let count: u64 = self
            .client
            .eval(
                WINDOW_ADD_SCRIPT,
                key,
                vec![
                    cutoff.to_string(),
                    score.to_string(),
                    member.to_string(),
                    ttl_secs.to_string(),
                ],
            )
            .await
            .map_err(store_err)?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.client
            .get::<Option<String>, _>(key)
            .await
            .map_err(store_err)
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.client
            .set::<(), _, _>(key, value, None, None, false)
            .await
            .map_err(store_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: i64) -> AppResult<()> {
        self.client
            .set::<(), _, _>(key, value, Some(Expiration::EX(ttl_secs)), None, false)
            .await
            .map_err(store_err)
    }

    async fn del(&self, key: &str) -> AppResult<bool> {
        let removed: i64 = self.client.del(key).await.map_err(store_err)?;
        Ok(removed > 0)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> AppResult<bool> {
        let removed: i64 = self
            .client
            .eval(DEL_IF_EQ_SCRIPT, key, expected)
            .await
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> AppResult<bool> {
        let updated: i64 = self
            .client
            .expire(key, ttl_secs, None)
            .await
            .map_err(store_err)?;
        Ok(updated > 0)
    }

    async fn incr(&self, key: &str) -> AppResult<i64> {
        self.client.incr::<i64, _>(key).await.map_err(store_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedisStore>();
    }
}
