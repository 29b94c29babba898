//! Outbound delivery queue for clickrush.
//!
//! This crate governs every message the bot sends:
//!
//! - **Jobs**: messages, deferred actions, message edits
//! - **Dispatcher**: concurrent workers behind a global rate governor
//! - **Channels**: named intent slots with newest-wins supersession
//! - **Rate limiting**: sliding-window admission control per identifier
//! - **Retry**: exponential backoff with platform retry-after hints
//! - **Broadcast**: chunked fan-out at background priority

pub mod channel;
pub mod delivery;
mod dispatcher;
pub mod effects;
pub mod governor;
pub mod job;
pub mod job_store;
pub mod rate_limit;
pub mod retry;
pub mod supersession;
pub mod transport;

pub use channel::Channel;
pub use delivery::{DeliveryQueue, DispatchOptions};
pub use dispatcher::DispatcherHandle;
pub use effects::EffectRegistry;
pub use governor::DispatchGovernor;
pub use job::{ChannelRef, Job, JobKind, JobPayload, JobState};
pub use job_store::{JobStore, QueueCounts};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use retry::RetryConfig;
pub use supersession::SupersessionTracker;
pub use transport::{BotApiClient, MessageOptions, MessagingApi, SendError};
