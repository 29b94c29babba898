//! In-memory implementation of [`SortedStore`].
//!
//! Single-process stand-in for Redis, used by tests and development
//! deployments. One mutex serializes all operations, which makes every
//! primitive trivially atomic. TTLs are enforced lazily on access, like
//! the trimming behavior the rate limiter relies on.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clickrush_common::{AppError, AppResult};
use tokio::sync::Mutex;

use crate::SortedStore;

#[derive(Debug, Clone)]
enum Value {
    Scalar(String),
    Zset(Vec<(String, f64)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory [`SortedStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn wrong_type(key: &str) -> AppError {
    AppError::Store(format!("wrong value type for key {key}"))
}

/// Drop the entry if its TTL has elapsed, then return it if still present.
fn live<'a>(map: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if map.get(key).is_some_and(|e| e.expired(now)) {
        map.remove(key);
    }
    map.get_mut(key)
}

fn zset_mut<'a>(
    map: &'a mut HashMap<String, Entry>,
    key: &str,
) -> AppResult<Option<&'a mut Vec<(String, f64)>>> {
    match live(map, key) {
        None => Ok(None),
        Some(entry) => match &mut entry.value {
            Value::Zset(members) => Ok(Some(members)),
            Value::Scalar(_) => Err(wrong_type(key)),
        },
    }
}

fn zset_sort(members: &mut [(String, f64)]) {
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
}

#[async_trait]
impl SortedStore for MemoryStore {
    async fn zadd(&self, key: &str, score: f64, member: &str) -> AppResult<()> {
        let mut map = self.inner.lock().await;
        match live(&mut map, key) {
            Some(entry) => match &mut entry.value {
                Value::Zset(members) => {
                    if let Some(existing) = members.iter_mut().find(|(m, _)| m == member) {
                        existing.1 = score;
                    } else {
                        members.push((member.to_string(), score));
                    }
                    Ok(())
                }
                Value::Scalar(_) => Err(wrong_type(key)),
            },
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Zset(vec![(member.to_string(), score)]),
                        expires_at: None,
                    },
                );
                Ok(())
            }
        }
    }

    async fn zcard(&self, key: &str) -> AppResult<u64> {
        let mut map = self.inner.lock().await;
        Ok(zset_mut(&mut map, key)?.map_or(0, |m| m.len() as u64))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<u64>,
    ) -> AppResult<Vec<(String, f64)>> {
        let mut map = self.inner.lock().await;
        let Some(members) = zset_mut(&mut map, key)? else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<(String, f64)> = members
            .iter()
            .filter(|(_, s)| *s >= min && *s <= max)
            .cloned()
            .collect();
        zset_sort(&mut matched);
        if let Some(limit) = limit {
            matched.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(matched)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> AppResult<u64> {
        let mut map = self.inner.lock().await;
        let Some(members) = zset_mut(&mut map, key)? else {
            return Ok(0);
        };
        let before = members.len();
        members.retain(|(_, s)| *s < min || *s > max);
        Ok((before - members.len()) as u64)
    }

    async fn zrem(&self, key: &str, member: &str) -> AppResult<bool> {
        let mut map = self.inner.lock().await;
        let Some(members) = zset_mut(&mut map, key)? else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|(m, _)| m != member);
        Ok(members.len() < before)
    }

    async fn zpop_min(&self, key: &str) -> AppResult<Option<(String, f64)>> {
        let mut map = self.inner.lock().await;
        let Some(members) = zset_mut(&mut map, key)? else {
            return Ok(None);
        };
        if members.is_empty() {
            return Ok(None);
        }
        zset_sort(members);
        Ok(Some(members.remove(0)))
    }

    async fn zpop_min_move(
        &self,
        src: &str,
        dst: &str,
        dst_score: f64,
    ) -> AppResult<Option<String>> {
        let mut map = self.inner.lock().await;

        let member = {
            let Some(members) = zset_mut(&mut map, src)? else {
                return Ok(None);
            };
            if members.is_empty() {
                return Ok(None);
            }
            zset_sort(members);
            members.remove(0).0
        };

        match live(&mut map, dst) {
            Some(entry) => match &mut entry.value {
                Value::Zset(members) => {
                    if let Some(existing) = members.iter_mut().find(|(m, _)| m == &member) {
                        existing.1 = dst_score;
                    } else {
                        members.push((member.clone(), dst_score));
                    }
                }
                Value::Scalar(_) => return Err(wrong_type(dst)),
            },
            None => {
                map.insert(
                    dst.to_string(),
                    Entry {
                        value: Value::Zset(vec![(member.clone(), dst_score)]),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(Some(member))
    }

    async fn zwindow_add(
        &self,
        key: &str,
        cutoff: f64,
        score: f64,
        member: &str,
        ttl_secs: i64,
    ) -> AppResult<u64> {
        let mut map = self.inner.lock().await;
        let ttl = Duration::from_secs(u64::try_from(ttl_secs).unwrap_or(0));

        match live(&mut map, key) {
            Some(entry) => match &mut entry.value {
                Value::Zset(members) => {
                    members.retain(|(_, s)| *s > cutoff);
                    let count = members.len() as u64;
                    if let Some(existing) = members.iter_mut().find(|(m, _)| m == member) {
                        existing.1 = score;
                    } else {
                        members.push((member.to_string(), score));
                    }
                    entry.expires_at = Some(Instant::now() + ttl);
                    Ok(count)
                }
                Value::Scalar(_) => Err(wrong_type(key)),
            },
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Zset(vec![(member.to_string(), score)]),
                        expires_at: Some(Instant::now() + ttl),
                    },
                );
                Ok(0)
            }
        }
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut map = self.inner.lock().await;
        match live(&mut map, key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Scalar(value) => Ok(Some(value.clone())),
                Value::Zset(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut map = self.inner.lock().await;
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: i64) -> AppResult<()> {
        let mut map = self.inner.lock().await;
        let ttl = Duration::from_secs(u64::try_from(ttl_secs).unwrap_or(0));
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<bool> {
        let mut map = self.inner.lock().await;
        let existed = live(&mut map, key).is_some();
        map.remove(key);
        Ok(existed)
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> AppResult<bool> {
        let mut map = self.inner.lock().await;
        let matches = match live(&mut map, key) {
            Some(entry) => match &entry.value {
                Value::Scalar(value) => value == expected,
                Value::Zset(_) => return Err(wrong_type(key)),
            },
            None => false,
        };
        if matches {
            map.remove(key);
        }
        Ok(matches)
    }

    async fn expire(&self, key: &str, ttl_secs: i64) -> AppResult<bool> {
        let mut map = self.inner.lock().await;
        match live(&mut map, key) {
            Some(entry) => {
                let ttl = Duration::from_secs(u64::try_from(ttl_secs).unwrap_or(0));
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn incr(&self, key: &str) -> AppResult<i64> {
        let mut map = self.inner.lock().await;
        match live(&mut map, key) {
            Some(entry) => match &mut entry.value {
                Value::Scalar(value) => {
                    let current: i64 = value
                        .parse()
                        .map_err(|_| AppError::Store(format!("non-integer value at {key}")))?;
                    let next = current + 1;
                    *value = next.to_string();
                    Ok(next)
                }
                Value::Zset(_) => Err(wrong_type(key)),
            },
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Scalar("1".to_string()),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zpop_min_orders_by_score_then_member() {
        let store = MemoryStore::new();
        store.zadd("z", 2.0, "b").await.unwrap();
        store.zadd("z", 1.0, "c").await.unwrap();
        store.zadd("z", 1.0, "a").await.unwrap();

        assert_eq!(store.zpop_min("z").await.unwrap(), Some(("a".into(), 1.0)));
        assert_eq!(store.zpop_min("z").await.unwrap(), Some(("c".into(), 1.0)));
        assert_eq!(store.zpop_min("z").await.unwrap(), Some(("b".into(), 2.0)));
        assert_eq!(store.zpop_min("z").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zadd_updates_score_in_place() {
        let store = MemoryStore::new();
        store.zadd("z", 5.0, "a").await.unwrap();
        store.zadd("z", 1.0, "a").await.unwrap();

        assert_eq!(store.zcard("z").await.unwrap(), 1);
        assert_eq!(store.zpop_min("z").await.unwrap(), Some(("a".into(), 1.0)));
    }

    #[tokio::test]
    async fn test_zrem_reports_presence() {
        let store = MemoryStore::new();
        store.zadd("z", 1.0, "a").await.unwrap();

        assert!(store.zrem("z", "a").await.unwrap());
        assert!(!store.zrem("z", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_zrange_and_zrem_range_by_score() {
        let store = MemoryStore::new();
        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            store.zadd("z", score, member).await.unwrap();
        }

        let range = store
            .zrange_by_score("z", 2.0, 3.0, None)
            .await
            .unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].0, "b");

        let limited = store
            .zrange_by_score("z", f64::NEG_INFINITY, f64::INFINITY, Some(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].0, "a");

        assert_eq!(store.zrem_range_by_score("z", 1.0, 2.0).await.unwrap(), 2);
        assert_eq!(store.zcard("z").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_zpop_min_move() {
        let store = MemoryStore::new();
        store.zadd("src", 2.0, "b").await.unwrap();
        store.zadd("src", 1.0, "a").await.unwrap();

        let moved = store.zpop_min_move("src", "dst", 9.0).await.unwrap();
        assert_eq!(moved, Some("a".to_string()));
        assert_eq!(store.zcard("src").await.unwrap(), 1);

        // The member lands in dst with the new score, in the same step.
        let dst = store
            .zrange_by_score("dst", f64::NEG_INFINITY, f64::INFINITY, None)
            .await
            .unwrap();
        assert_eq!(dst, vec![("a".to_string(), 9.0)]);

        store.zpop_min_move("src", "dst", 9.0).await.unwrap();
        assert_eq!(store.zpop_min_move("src", "dst", 9.0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zwindow_add_trims_then_counts() {
        let store = MemoryStore::new();
        assert_eq!(store.zwindow_add("w", 0.0, 10.0, "a", 60).await.unwrap(), 0);
        assert_eq!(store.zwindow_add("w", 0.0, 11.0, "b", 60).await.unwrap(), 1);

        // Entries at or below the cutoff are dropped before counting.
        assert_eq!(store.zwindow_add("w", 10.0, 12.0, "c", 60).await.unwrap(), 1);
        assert_eq!(store.zcard("w").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_del_if_eq() {
        let store = MemoryStore::new();
        store.set("k", "v1").await.unwrap();

        assert!(!store.del_if_eq("k", "v2").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("v1".to_string()));
        assert!(store.del_if_eq("k", "v1").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 0).await.unwrap();

        // Expired entries are trimmed on the next read.
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert_eq!(store.incr("n").await.unwrap(), 2);
        assert_eq!(store.get("n").await.unwrap(), Some("2".to_string()));
    }
}
