//! Job model for the delivery queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::transport::MessageOptions;

/// Kind of work a job represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Deliver literal message content to the external API.
    SendMessage,
    /// Invoke a registered effect (callback-style action).
    RunAction,
    /// Invoke a registered effect that edits an existing message.
    RunEdit,
}

/// Job payload: either literal content or a handle to an in-process effect.
///
/// Effect tokens index the in-process [`EffectRegistry`](crate::EffectRegistry)
/// and are capabilities, not data: they cannot be restored after a process
/// restart. Anything that must survive a crash has to be enqueued as a
/// message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobPayload {
    /// Literal message content plus formatting options.
    Message {
        /// Message text.
        text: String,
        /// Formatting and delivery options.
        options: MessageOptions,
    },
    /// Opaque handle into the in-process effect registry.
    Effect {
        /// Registry token.
        token: String,
    },
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Ready to be claimed.
    Waiting,
    /// Not yet visible to workers (future `ready_at` or retry backoff).
    Delayed,
    /// Claimed by a worker.
    Active,
    /// Executed successfully (or skipped as superseded).
    Completed,
    /// Retries exhausted.
    Failed,
    /// Discarded before execution (superseded while pending).
    Removed,
}

/// Channel bookkeeping carried on a job record.
///
/// Enough to recompute the pointer key without the original [`Channel`]
/// value object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRef {
    /// Stable channel key, `{domain}:{context}`.
    pub full_name: String,
    /// Whether claim-time supersession checking applies.
    pub replaceable: bool,
}

impl From<&Channel> for ChannelRef {
    fn from(channel: &Channel) -> Self {
        Self {
            full_name: channel.full_name(),
            replaceable: channel.replaceable(),
        }
    }
}

/// A unit of outbound work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique, lexicographically sortable id.
    pub id: String,
    /// Kind of work.
    pub kind: JobKind,
    /// Destination conversation/chat id.
    pub target: String,
    /// Literal content or effect handle.
    pub payload: JobPayload,
    /// Higher executes first.
    pub priority: i32,
    /// Epoch milliseconds after which the job becomes claimable.
    pub ready_at: i64,
    /// Execution attempts started so far.
    pub attempt: u32,
    /// Retry ceiling.
    pub max_attempts: u32,
    /// Channel bookkeeping, if the job carries a channel.
    pub channel: Option<ChannelRef>,
    /// Lifecycle state.
    pub state: JobState,
    /// Enqueue sequence number; FIFO tie-breaker within a priority tier.
    pub seq: i64,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// Most recent execution error, if any.
    pub last_error: Option<String>,
}

impl Job {
    /// Whether the job still sits in a pending (pre-claim) state.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.state, JobState::Waiting | JobState::Delayed)
    }
}
