//! Sliding-window rate limiting over the backing store.
//!
//! Admission control keyed by an arbitrary identifier (per-user,
//! per-target, global). Events are kept in a sorted set scored by their
//! timestamp; entries older than the trailing window are trimmed lazily on
//! each check rather than proactively.
//!
//! A denied check still records its event: repeated rejected attempts must
//! not let a caller retry past the limit for free. This protects the
//! external API but lengthens recovery under sustained overload, so the
//! behavior is part of the contract rather than an accident.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use clickrush_common::{AppError, AppResult, IdGenerator};
use clickrush_store::SortedStore;
use tracing::debug;

/// Result of a rate limit check.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// Requests left in the window after this one.
    pub remaining: u32,
    /// When the oldest window entry expires.
    pub reset_at: DateTime<Utc>,
}

/// Sliding-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SortedStore>,
    prefix: String,
    ids: IdGenerator,
}

impl RateLimiter {
    /// Create a limiter over the given store.
    pub fn new(store: Arc<dyn SortedStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            ids: IdGenerator::new(),
        }
    }

    fn window_key(&self, identifier: &str) -> String {
        format!("{}:rate:{identifier}", self.prefix)
    }

    /// Check admission for `identifier`, consuming one unit of window
    /// capacity whether or not the request is allowed.
    ///
    /// A store failure propagates as [`AppError::Store`]; it is never
    /// treated as "limit not exceeded".
    pub async fn check(
        &self,
        identifier: &str,
        max_requests: u32,
        window_secs: i64,
    ) -> AppResult<RateLimitDecision> {
        let key = self.window_key(identifier);
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = window_secs * 1000;

        // Trim, count, and record in one atomic store call so concurrent
        // checks at the boundary cannot both see capacity left. The event
        // is recorded even when denied; see the module docs.
        let member = format!("{now_ms}-{}", self.ids.generate_token());
        let count_before = self
            .store
            .zwindow_add(
                &key,
                window_floor(now_ms, window_ms),
                now_ms as f64,
                &member,
                window_secs + 1,
            )
            .await?;

        let count_before = u32::try_from(count_before).unwrap_or(u32::MAX);
        let allowed = count_before < max_requests;
        let remaining = max_requests.saturating_sub(count_before.saturating_add(1));
        let reset_at = self.window_reset(&key, now_ms, window_ms).await?;

        debug!(
            identifier = %identifier,
            allowed = allowed,
            remaining = remaining,
            "Rate limit check"
        );

        Ok(RateLimitDecision {
            allowed,
            remaining,
            reset_at,
        })
    }

    /// Read-only window status; trims but never consumes capacity.
    ///
    /// For UI display ("remaining clicks available") without spending
    /// budget.
    pub async fn status(
        &self,
        identifier: &str,
        max_requests: u32,
        window_secs: i64,
    ) -> AppResult<RateLimitDecision> {
        let key = self.window_key(identifier);
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = window_secs * 1000;

        self.store
            .zrem_range_by_score(&key, f64::NEG_INFINITY, window_floor(now_ms, window_ms))
            .await?;
        let count = self.store.zcard(&key).await?;

        let count = u32::try_from(count).unwrap_or(u32::MAX);
        let reset_at = self.window_reset(&key, now_ms, window_ms).await?;

        Ok(RateLimitDecision {
            allowed: count < max_requests,
            remaining: max_requests.saturating_sub(count),
            reset_at,
        })
    }

    /// Check admission, converting a denial into the typed retryable error
    /// handlers surface to callers.
    pub async fn enforce(
        &self,
        identifier: &str,
        max_requests: u32,
        window_secs: i64,
    ) -> AppResult<RateLimitDecision> {
        let decision = self.check(identifier, max_requests, window_secs).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(AppError::RateLimited {
                reset_at: decision.reset_at,
            })
        }
    }

    /// When the oldest surviving entry leaves the window.
    async fn window_reset(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> AppResult<DateTime<Utc>> {
        let oldest = self
            .store
            .zrange_by_score(key, f64::NEG_INFINITY, f64::INFINITY, Some(1))
            .await?;

        #[allow(clippy::cast_possible_truncation)]
        let reset_ms = oldest
            .first()
            .map_or(now_ms, |(_, score)| *score as i64 + window_ms);
        Ok(Utc
            .timestamp_millis_opt(reset_ms)
            .single()
            .unwrap_or_else(Utc::now))
    }
}

/// Upper bound (inclusive) of scores considered expired at `now_ms`.
fn window_floor(now_ms: i64, window_ms: i64) -> f64 {
    (now_ms - window_ms) as f64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clickrush_store::MemoryStore;
    use std::time::Duration;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryStore::new()), "test")
    }

    #[tokio::test]
    async fn test_sliding_window_allows_then_denies() {
        let limiter = limiter();

        for i in 0..10 {
            let decision = limiter.check("user", 10, 1).await.unwrap();
            assert!(decision.allowed, "request {i} should be allowed");
        }

        let denied = limiter.check("user", 10, 1).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn test_window_recovers_after_expiry() {
        let limiter = limiter();

        for _ in 0..10 {
            limiter.check("user", 10, 1).await.unwrap();
        }
        assert!(!limiter.check("user", 10, 1).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let decision = limiter.check("user", 10, 1).await.unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_denied_check_consumes_capacity() {
        let limiter = limiter();

        for _ in 0..3 {
            limiter.check("user", 3, 60).await.unwrap();
        }
        let denied = limiter.check("user", 3, 60).await.unwrap();
        assert!(!denied.allowed);

        // The denial itself was recorded: status sees 4 events, not 3.
        let status = limiter.status("user", 3, 60).await.unwrap();
        assert_eq!(status.remaining, denied.remaining);
        assert_eq!(status.remaining, 0);
        assert!(!status.allowed);
    }

    #[tokio::test]
    async fn test_status_does_not_consume() {
        let limiter = limiter();

        limiter.check("user", 5, 60).await.unwrap();
        let first = limiter.status("user", 5, 60).await.unwrap();
        let second = limiter.status("user", 5, 60).await.unwrap();

        assert_eq!(first.remaining, 4);
        assert_eq!(second.remaining, 4);
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let limiter = limiter();

        let first = limiter.check("user", 3, 60).await.unwrap();
        assert_eq!(first.remaining, 2);
        let second = limiter.check("user", 3, 60).await.unwrap();
        assert_eq!(second.remaining, 1);
        let third = limiter.check("user", 3, 60).await.unwrap();
        assert_eq!(third.remaining, 0);
        assert!(third.allowed);
    }

    #[tokio::test]
    async fn test_separate_identifiers() {
        let limiter = limiter();

        for _ in 0..3 {
            limiter.check("user_a", 3, 60).await.unwrap();
        }
        assert!(!limiter.check("user_a", 3, 60).await.unwrap().allowed);
        assert!(limiter.check("user_b", 3, 60).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_over_admit() {
        let limiter = limiter();

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check("user", 10, 60).await.unwrap().allowed })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn test_enforce_surfaces_typed_error() {
        let limiter = limiter();

        limiter.enforce("user", 1, 60).await.unwrap();
        let err = limiter.enforce("user", 1, 60).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
    }
}
