//! In-process registry of deferred effects.
//!
//! Action and edit jobs carry a closure-like payload. The job record only
//! stores an opaque token; the actual callable lives here. Factories are
//! re-invocable so a retried job re-runs its effect from scratch, and they
//! are discarded when the job reaches a terminal outcome. Tokens do not
//! survive a process restart: a claimed job whose token is gone fails
//! terminally instead of retrying.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use clickrush_common::IdGenerator;
use futures::future::BoxFuture;

use crate::transport::SendError;

/// A deferred, re-invocable effect.
pub type EffectFn = dyn Fn() -> BoxFuture<'static, Result<(), SendError>> + Send + Sync;

/// Registry of pending effects, keyed by opaque token.
#[derive(Default)]
pub struct EffectRegistry {
    inner: Mutex<HashMap<String, Arc<EffectFn>>>,
    ids: IdGenerator,
}

impl EffectRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an effect and return its token.
    pub fn register<F, Fut>(&self, effect: F) -> String
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), SendError>> + Send + 'static,
    {
        let token = self.ids.generate_token();
        let wrapped: Arc<EffectFn> = Arc::new(move || Box::pin(effect()));
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.clone(), wrapped);
        token
    }

    /// Look up an effect by token.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<Arc<EffectFn>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
    }

    /// Discard an effect once its job reaches a terminal outcome.
    pub fn discard(&self, token: &str) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
    }

    /// Number of pending effects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the registry holds no pending effects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_register_invoke_discard() {
        let registry = EffectRegistry::new();
        let calls = Arc::new(AtomicU32::new(0));

        let calls_in = Arc::clone(&calls);
        let token = registry.register(move || {
            let calls = Arc::clone(&calls_in);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let effect = registry.get(&token).unwrap();
        effect().await.unwrap();
        effect().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        registry.discard(&token);
        assert!(registry.get(&token).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_token() {
        let registry = EffectRegistry::new();
        assert!(registry.get("missing").is_none());
    }
}
