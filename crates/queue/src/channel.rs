//! Outbound intent channels.
//!
//! A channel names a logical slot of outbound intent, e.g. "the current
//! navigation update for chat X". When a channel is replaceable, a newly
//! enqueued occupant supersedes any pending older one for the same
//! (channel, target) pair, so rapid re-triggers of the same UI action can
//! never deliver a stale result after a newer one.

use std::fmt;
use std::hash::{Hash, Hasher};

use clickrush_common::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // literal pattern
    Regex::new(r"^[A-Z][A-Za-z0-9]*$").unwrap()
});

static CONTEXT_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // literal pattern
    Regex::new(r"^[a-z][A-Za-z0-9]*$").unwrap()
});

/// A named slot of outbound intent.
///
/// Immutable after construction. Two channels are equal iff their domain
/// and context match; the replaceable flag does not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    domain: String,
    context: String,
    replaceable: bool,
}

impl Channel {
    /// Create a channel, validating the identifier syntax.
    ///
    /// `domain` must be a capitalized word (`Menu`, `Leaderboard`),
    /// `context` a lower-camel word (`navigation`, `scoreRefresh`).
    pub fn new(domain: &str, context: &str, replaceable: bool) -> AppResult<Self> {
        if !DOMAIN_RE.is_match(domain) {
            return Err(AppError::Validation(format!(
                "invalid channel domain: {domain:?}"
            )));
        }
        if !CONTEXT_RE.is_match(context) {
            return Err(AppError::Validation(format!(
                "invalid channel context: {context:?}"
            )));
        }
        Ok(Self {
            domain: domain.to_string(),
            context: context.to_string(),
            replaceable,
        })
    }

    /// Channel domain (capitalized word).
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Channel context (lower-camel word).
    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Whether a new occupant supersedes pending older ones.
    #[must_use]
    pub const fn replaceable(&self) -> bool {
        self.replaceable
    }

    /// Stable key used for supersession pointers: `{domain}:{context}`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.domain, self.context)
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain && self.context == other.context
    }
}

impl Eq for Channel {}

impl Hash for Channel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.domain.hash(state);
        self.context.hash(state);
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.context)
    }
}
