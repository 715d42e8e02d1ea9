//! Progression targets and their rewards.
//!
//! A *target* is the thing a user makes progress toward: a single-counter
//! [`Achievement`] or a multi-objective [`Quest`]. Definitions are owned by
//! content management and reach this crate read-only through the catalog
//! traits in [`crate::store`]; progress against them lives in
//! [`crate::progress`].

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a user.
///
/// Users are owned by the identity service; this crate only ever sees their
/// ids, so the newtype wraps the externally assigned string rather than a
/// locally generated UUID.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a `UserId` from an externally assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an achievement definition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AchievementId(String);

impl AchievementId {
    /// Create an `AchievementId` from an externally assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AchievementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a quest definition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestId(String);

impl QuestId {
    /// Create a `QuestId` from an externally assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Definitions
// ============================================================================

/// The reward attached to a target, granted once on completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    /// Points credited to the user's balance.
    pub points: u32,
    /// Experience credited toward the user's level.
    pub experience: u32,
}

impl Reward {
    /// Create a reward granting the given points and experience.
    #[must_use]
    pub const fn new(points: u32, experience: u32) -> Self {
        Self { points, experience }
    }

    /// Whether the reward grants anything at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.points == 0 && self.experience == 0
    }
}

/// An achievement definition: a single counter with a completion threshold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    /// Definition identifier.
    pub id: AchievementId,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Progress value at which the achievement completes. Always >= 1.
    pub threshold: u32,
    /// Reward granted on completion.
    pub reward: Reward,
}

/// One step of a quest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    /// Display description.
    pub description: String,
    /// Progress value at which this objective completes. Always >= 1.
    pub target: u32,
    /// Routing key of a domain event that advances this objective by one,
    /// if the objective is event-fed rather than explicitly updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_event: Option<String>,
}

/// A quest definition: an ordered list of objectives, all of which must
/// complete for the quest to complete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quest {
    /// Definition identifier.
    pub id: QuestId,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// The quest's objectives, in definition order.
    pub objectives: Vec<Objective>,
    /// Reward granted when every objective completes.
    pub reward: Reward,
    /// Seconds after start before the quest expires, if time-limited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<u64>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn user_id_display_matches_inner() {
        let id = UserId::new("user-42");
        assert_eq!(id.to_string(), "user-42");
        assert_eq!(id.as_str(), "user-42");
    }

    #[test]
    fn id_serde_is_transparent() {
        let id = AchievementId::new("first-blood");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"first-blood\"");
        let back: AchievementId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn empty_reward_detected() {
        assert!(Reward::new(0, 0).is_empty());
        assert!(!Reward::new(10, 0).is_empty());
        assert!(!Reward::new(0, 5).is_empty());
    }

    #[test]
    fn objective_source_event_omitted_when_absent() {
        let objective = Objective {
            description: "Win a match".to_string(),
            target: 3,
            source_event: None,
        };
        let json = serde_json::to_string(&objective).unwrap();
        assert!(!json.contains("source_event"));
    }
}
