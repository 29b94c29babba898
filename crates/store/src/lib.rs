//! Backing-store abstraction for clickrush.
//!
//! Both the job store and the rate limiter are built on a small set of
//! atomic sorted-set and key-value primitives. This crate defines that
//! contract as [`SortedStore`] and ships two implementations:
//!
//! - [`RedisStore`]: production backend on a shared Redis, using fred
//! - [`MemoryStore`]: single-process backend for tests and development
//!
//! Every operation returns `AppResult`; an unavailable backend surfaces as
//! [`AppError::Store`](clickrush_common::AppError::Store) and is never
//! silently treated as an empty or permissive answer.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use clickrush_common::AppResult;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Atomic sorted-set and key-value operations shared by the job store,
/// supersession pointers, and the rate limiter.
///
/// Members within a sorted set are unique; re-adding a member updates its
/// score. Score ordering is ascending, ties broken by member lexicographic
/// order (Redis semantics).
#[async_trait]
pub trait SortedStore: Send + Sync {
    /// Add a member with the given score, replacing any previous score.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> AppResult<()>;

    /// Number of members in the sorted set.
    async fn zcard(&self, key: &str) -> AppResult<u64>;

    /// Members with `min <= score <= max`, ascending, with their scores.
    /// `limit` caps the number of returned members.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<u64>,
    ) -> AppResult<Vec<(String, f64)>>;

    /// Remove all members with `min <= score <= max`; returns the count.
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> AppResult<u64>;

    /// Remove a single member. Returns whether it was present.
    ///
    /// The boolean is the arbiter for claim/promotion races: exactly one
    /// concurrent caller observes `true` for a given member.
    async fn zrem(&self, key: &str, member: &str) -> AppResult<bool>;

    /// Atomically pop the member with the lowest score.
    async fn zpop_min(&self, key: &str) -> AppResult<Option<(String, f64)>>;

    /// Atomically pop the lowest-scored member of `src` and add it to
    /// `dst` with `dst_score`. Returns the moved member.
    ///
    /// Claim primitive: the member is never in neither set, so a crash
    /// mid-claim leaves the job visible to lease recovery.
    async fn zpop_min_move(&self, src: &str, dst: &str, dst_score: f64)
    -> AppResult<Option<String>>;

    /// Atomically trim members scored at or below `cutoff`, count the
    /// survivors, insert `member` with `score`, and refresh the key TTL.
    /// Returns the survivor count from before the insert.
    ///
    /// Sliding-window primitive: one round trip, so two concurrent
    /// admission checks at the window boundary cannot both observe the
    /// same count.
    async fn zwindow_add(
        &self,
        key: &str,
        cutoff: f64,
        score: f64,
        member: &str,
        ttl_secs: i64,
    ) -> AppResult<u64>;

    /// Get a scalar value.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Set a scalar value without expiry.
    async fn set(&self, key: &str, value: &str) -> AppResult<()>;

    /// Set a scalar value with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: i64) -> AppResult<()>;

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> AppResult<bool>;

    /// Delete a key only if its current value equals `expected`.
    ///
    /// Compare-and-delete; used for pointer cleanup so a terminal job
    /// never deletes a pointer a newer job has already overwritten.
    async fn del_if_eq(&self, key: &str, expected: &str) -> AppResult<bool>;

    /// Set or refresh a TTL on a key. Returns whether the key exists.
    async fn expire(&self, key: &str, ttl_secs: i64) -> AppResult<bool>;

    /// Atomically increment an integer value, creating it at 0 first.
    async fn incr(&self, key: &str) -> AppResult<i64>;
}
