//! Routing keys of the domain events this system publishes and consumes.
//!
//! Keeping them as constants means a typo is a compile error, not a silently
//! unbound queue.

/// Achievement lifecycle and progress events.
pub mod achievement {
    /// An achievement definition was created.
    pub const CREATED: &str = "achievement.created";
    /// An achievement definition was updated.
    pub const UPDATED: &str = "achievement.updated";
    /// A user completed an achievement.
    pub const COMPLETED: &str = "achievement.completed";
    /// A user's achievement progress changed.
    pub const PROGRESS_UPDATED: &str = "achievement.progress.updated";
}

/// Quest lifecycle and progress events.
pub mod quest {
    /// A quest definition was created.
    pub const CREATED: &str = "quest.created";
    /// A quest definition was updated.
    pub const UPDATED: &str = "quest.updated";
    /// A user started a quest.
    pub const STARTED: &str = "quest.started";
    /// A user completed a quest.
    pub const COMPLETED: &str = "quest.completed";
    /// A user's quest progress changed.
    pub const PROGRESS_UPDATED: &str = "quest.progress.updated";
}

/// Reward lifecycle events.
pub mod reward {
    /// A reward was created for a user.
    pub const CREATED: &str = "reward.created";
    /// A user claimed a reward.
    pub const CLAIMED: &str = "reward.claimed";
}

/// Notification lifecycle events.
pub mod notification {
    /// A notification was created for a user.
    pub const CREATED: &str = "notification.created";
    /// A user read a notification.
    pub const READ: &str = "notification.read";
    /// A user archived a notification.
    pub const ARCHIVED: &str = "notification.archived";
}

/// User account events emitted when rewards are granted.
pub mod user {
    /// Points were credited to a user's balance.
    pub const POINTS_ADDED: &str = "user.points.added";
    /// Experience was credited toward a user's level.
    pub const EXPERIENCE_ADDED: &str = "user.experience.added";
}
