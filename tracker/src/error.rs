//! Error types for progression tracking.

use questline_core::progress::ObjectiveOutOfRange;
use questline_core::store::{GrantError, StoreError};
use questline_core::target::{AchievementId, QuestId, UserId};
use thiserror::Error;

/// Errors surfaced by the trackers and the reward dispatcher.
///
/// Event publication is absent on purpose: a persisted update is never
/// failed because of eventing, the bus degrades to its spool and residual
/// failures are logged.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// No achievement definition with this id exists in the catalog.
    #[error("unknown achievement '{0}'")]
    AchievementNotFound(AchievementId),

    /// No quest definition with this id exists in the catalog.
    #[error("unknown quest '{0}'")]
    QuestNotFound(QuestId),

    /// `start` was called for a quest the user already has underway.
    #[error("quest '{quest_id}' already started for user '{user_id}'")]
    QuestAlreadyStarted {
        /// The user who tried to start the quest.
        user_id: UserId,
        /// The quest in question.
        quest_id: QuestId,
    },

    /// `abandon` or `reset` was called for a quest the user has no record
    /// for.
    #[error("quest '{quest_id}' was never started for user '{user_id}'")]
    QuestNotStarted {
        /// The user without a record.
        user_id: UserId,
        /// The quest in question.
        quest_id: QuestId,
    },

    /// An objective index does not name an objective of the definition.
    #[error(transparent)]
    Objective(#[from] ObjectiveOutOfRange),

    /// A reward grant failed before the collected flag was set; the next
    /// completed update re-dispatches.
    #[error("reward grant failed: {0}")]
    Grant(#[from] GrantError),

    /// The progress store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TrackerError {
    /// Whether retrying the whole read-modify-write resolves this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}
