//! # Questline Tracker
//!
//! The write side of the progression system: applies changes to achievement
//! and quest progress, persists them, and emits the resulting domain events
//! through `questline-bus`.
//!
//! - [`achievement`]: value updates against achievement thresholds.
//! - [`quest`]: quest lifecycle (start, objectives, abandon, reset) and lazy
//!   expiry of time-limited quests.
//! - [`reward`]: one-shot reward dispatch for completions, keyed on the
//!   persisted `rewards_collected` flag.
//! - [`feed`]: an [`EventHandler`](questline_bus::EventHandler) that turns
//!   consumed events into objective progress.
//! - [`retry`]: bounded backoff for optimistic-concurrency conflicts.
//!
//! Every update is a read-modify-write against the progress store, guarded
//! by record revisions and retried on conflict. Persistence comes first;
//! event publication is best-effort after the write and never fails an
//! update (the bus spools what the broker will not take).

pub mod achievement;
pub mod error;
pub mod feed;
mod publish;
pub mod quest;
pub mod retry;
pub mod reward;

pub use achievement::AchievementTracker;
pub use error::TrackerError;
pub use feed::QuestFeedHandler;
pub use quest::QuestTracker;
pub use retry::{RetryPolicy, retry_with_predicate};
pub use reward::RewardDispatcher;
