//! Progress records and their pure transition functions.
//!
//! A progress record tracks one user's advancement toward one target. Records
//! are plain immutable data; every state change goes through a pure function
//! that takes the record by value and returns the updated record together
//! with what happened ([`Applied`]). Persistence and event publication are
//! the callers' concern, which keeps completion detection deterministic and
//! testable without any infrastructure.
//!
//! # Invariants
//!
//! - `value` (and each objective's `current_value`) stays within
//!   `[0, threshold]` for its target.
//! - A record is never `Completed` while below its threshold.
//! - Status moves forward only; the sole backwards edge is the explicit
//!   [`reset`](AchievementProgress::reset) operation.
//! - Terminal records ignore further changes, so rewards cannot fire twice.

use crate::target::{Achievement, AchievementId, Quest, QuestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use thiserror::Error;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a progress record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    /// Record exists but no progress has been made.
    NotStarted,
    /// Some progress, below the completion threshold.
    InProgress,
    /// Threshold reached. Terminal.
    Completed,
    /// Explicitly abandoned. Terminal.
    Failed,
    /// Time limit elapsed before completion. Terminal.
    Expired,
}

/// A status string that does not name a known [`ProgressStatus`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid progress status: {0}")]
pub struct InvalidStatus(pub String);

impl ProgressStatus {
    /// Convert status to its storage/wire string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Parse status from its storage/wire string representation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStatus`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, InvalidStatus> {
        match s {
            "NOT_STARTED" => Ok(Self::NotStarted),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(InvalidStatus(other.to_string())),
        }
    }

    /// Whether this status admits no further progress.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }

    /// The forward transition table.
    ///
    /// Staying in the current status counts as allowed (a no-op update).
    /// Terminal statuses admit nothing else; `NotStarted` is reachable only
    /// through [`reset`](AchievementProgress::reset), never as a transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::NotStarted, _) => true,
            (Self::InProgress, Self::NotStarted) => false,
            (Self::InProgress, _) => true,
            (Self::Completed, Self::Completed)
            | (Self::Failed, Self::Failed)
            | (Self::Expired, Self::Expired) => true,
            (Self::Completed | Self::Failed | Self::Expired, _) => false,
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

/// A change requested against a progress value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressChange {
    /// Set the value outright. Never lowers the stored value; lowering
    /// happens only through `reset`.
    Set(i64),
    /// Adjust the value by a signed delta.
    Add(i64),
}

/// Clamp a raw value into `[0, limit]`.
#[must_use]
pub fn clamp_value(raw: i64, limit: u32) -> u32 {
    u32::try_from(raw.clamp(0, i64::from(limit))).unwrap_or(limit)
}

/// Apply a change to a current value, clamped into `[0, limit]`.
///
/// `Set` keeps the larger of the current and requested values so that
/// concurrent setters converge on the furthest progress. `Add` saturates
/// at the clamp bounds.
#[must_use]
pub fn apply_change(current: u32, change: ProgressChange, limit: u32) -> u32 {
    match change {
        ProgressChange::Set(value) => clamp_value(i64::from(current).max(value), limit),
        ProgressChange::Add(delta) => clamp_value(i64::from(current).saturating_add(delta), limit),
    }
}

/// Derive the status implied by a value against a threshold.
///
/// Pure and order-independent; callers must still run the result through
/// [`ProgressStatus::can_transition_to`] so a record never moves backwards.
#[must_use]
pub const fn derive_status(value: u32, threshold: u32) -> ProgressStatus {
    if value >= threshold {
        ProgressStatus::Completed
    } else if value > 0 {
        ProgressStatus::InProgress
    } else {
        ProgressStatus::NotStarted
    }
}

/// The result of applying a change to a record.
#[derive(Clone, Debug)]
pub struct Applied<R> {
    /// The updated record.
    pub record: R,
    /// Whether anything observable changed (value, objectives, or status).
    pub changed: bool,
    /// Whether this change crossed the completion edge.
    pub completed_now: bool,
}

impl<R> Applied<R> {
    fn unchanged(record: R) -> Self {
        Self {
            record,
            changed: false,
            completed_now: false,
        }
    }
}

// ============================================================================
// Record trait
// ============================================================================

/// Common surface shared by achievement and quest progress records.
///
/// Lets stores and the reward dispatcher work generically over both record
/// shapes without knowing which one they hold.
pub trait ProgressRecord: Clone + Send + Sync + 'static {
    /// The id type of the target this record tracks.
    type TargetId: Clone + Eq + Hash + Send + Sync + fmt::Display;

    /// The user this record belongs to.
    fn user_id(&self) -> &UserId;
    /// The target this record tracks.
    fn target_id(&self) -> &Self::TargetId;
    /// Current lifecycle status.
    fn status(&self) -> ProgressStatus;
    /// Optimistic concurrency token. Zero means never persisted.
    fn revision(&self) -> u64;
    /// Replace the revision, typically after a successful upsert.
    #[must_use]
    fn with_revision(self, revision: u64) -> Self;
    /// Whether rewards for this record's completion were already granted.
    fn rewards_collected(&self) -> bool;
    /// Replace the rewards-collected flag.
    #[must_use]
    fn with_rewards_collected(self, collected: bool) -> Self;
}

// ============================================================================
// Achievement progress
// ============================================================================

/// One user's progress toward one achievement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementProgress {
    /// The user making progress.
    pub user_id: UserId,
    /// The achievement being progressed.
    pub achievement_id: AchievementId,
    /// Current value, within `[0, threshold]`.
    pub value: u32,
    /// Lifecycle status.
    pub status: ProgressStatus,
    /// Set once rewards were granted for completion.
    pub rewards_collected: bool,
    /// When progress first moved off zero.
    pub started_at: Option<DateTime<Utc>>,
    /// When the threshold was reached.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the record expires, if the target is time-limited.
    pub expires_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by the store on upsert.
    pub revision: u64,
}

impl AchievementProgress {
    /// A fresh, never-persisted record for the given user and achievement.
    #[must_use]
    pub const fn new(user_id: UserId, achievement_id: AchievementId) -> Self {
        Self {
            user_id,
            achievement_id,
            value: 0,
            status: ProgressStatus::NotStarted,
            rewards_collected: false,
            started_at: None,
            completed_at: None,
            expires_at: None,
            revision: 0,
        }
    }

    /// Apply a change against the definition, returning the updated record
    /// and whether the completion edge was crossed.
    ///
    /// Terminal records are returned unchanged.
    #[must_use]
    pub fn apply(
        self,
        change: ProgressChange,
        definition: &Achievement,
        now: DateTime<Utc>,
    ) -> Applied<Self> {
        if self.status.is_terminal() {
            return Applied::unchanged(self);
        }

        let value = apply_change(self.value, change, definition.threshold);
        let derived = derive_status(value, definition.threshold);
        let status = if self.status.can_transition_to(derived) {
            derived
        } else {
            self.status
        };

        let changed = value != self.value || status != self.status;
        let completed_now =
            status == ProgressStatus::Completed && self.status != ProgressStatus::Completed;

        let started_at = if status == ProgressStatus::NotStarted {
            self.started_at
        } else {
            self.started_at.or(Some(now))
        };
        let completed_at = if completed_now { Some(now) } else { self.completed_at };

        Applied {
            record: Self {
                value,
                status,
                started_at,
                completed_at,
                ..self
            },
            changed,
            completed_now,
        }
    }

    /// Return the record to its initial state, keeping only the identity
    /// and revision. Clears the reward flag, so a later completion grants
    /// again.
    #[must_use]
    pub fn reset(self) -> Self {
        Self {
            value: 0,
            status: ProgressStatus::NotStarted,
            rewards_collected: false,
            started_at: None,
            completed_at: None,
            expires_at: None,
            ..self
        }
    }
}

impl ProgressRecord for AchievementProgress {
    type TargetId = AchievementId;

    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn target_id(&self) -> &AchievementId {
        &self.achievement_id
    }

    fn status(&self) -> ProgressStatus {
        self.status
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn with_revision(self, revision: u64) -> Self {
        Self { revision, ..self }
    }

    fn rewards_collected(&self) -> bool {
        self.rewards_collected
    }

    fn with_rewards_collected(self, collected: bool) -> Self {
        Self {
            rewards_collected: collected,
            ..self
        }
    }
}

// ============================================================================
// Quest progress
// ============================================================================

/// Progress against a single quest objective.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveProgress {
    /// Position in the quest definition's objective list.
    pub index: u32,
    /// Current value, within `[0, target]` for this objective.
    pub current_value: u32,
    /// Whether this objective reached its target.
    pub completed: bool,
    /// When this objective reached its target.
    pub completed_at: Option<DateTime<Utc>>,
}

impl ObjectiveProgress {
    /// A fresh objective entry at the given definition index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self {
            index,
            current_value: 0,
            completed: false,
            completed_at: None,
        }
    }
}

/// An objective index outside the quest definition's objective list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("objective index {index} out of range for quest with {count} objectives")]
pub struct ObjectiveOutOfRange {
    /// The requested index.
    pub index: usize,
    /// How many objectives the definition has.
    pub count: usize,
}

/// One user's progress toward one quest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestProgress {
    /// The user making progress.
    pub user_id: UserId,
    /// The quest being progressed.
    pub quest_id: QuestId,
    /// Per-objective progress, one entry per definition objective.
    pub objectives: Vec<ObjectiveProgress>,
    /// Lifecycle status.
    pub status: ProgressStatus,
    /// Set once rewards were granted for completion.
    pub rewards_collected: bool,
    /// When the quest was started.
    pub started_at: Option<DateTime<Utc>>,
    /// When every objective completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the quest expires, for time-limited quests.
    pub expires_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by the store on upsert.
    pub revision: u64,
}

impl QuestProgress {
    /// Start a quest for a user: one zeroed objective entry per definition
    /// objective, `started_at` now, and an expiry when the definition is
    /// time-limited. The record begins [`ProgressStatus::NotStarted`]; the
    /// first effective objective change lifts it to `InProgress`.
    #[must_use]
    pub fn start(user_id: UserId, definition: &Quest, now: DateTime<Utc>) -> Self {
        let objectives = (0..definition.objectives.len())
            .map(|index| ObjectiveProgress::new(u32::try_from(index).unwrap_or(u32::MAX)))
            .collect();
        let expires_at = definition
            .time_limit_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now + chrono::Duration::seconds(secs));

        Self {
            user_id,
            quest_id: definition.id.clone(),
            objectives,
            status: ProgressStatus::NotStarted,
            rewards_collected: false,
            started_at: Some(now),
            completed_at: None,
            expires_at,
            revision: 0,
        }
    }

    /// Whether every objective reached its target.
    #[must_use]
    pub fn objectives_complete(&self) -> bool {
        !self.objectives.is_empty() && self.objectives.iter().all(|o| o.completed)
    }

    /// Whether the quest's time limit has elapsed without completion.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.expires_at.is_some_and(|at| now >= at)
    }

    /// Apply a change to one objective, completing the quest when it was the
    /// last outstanding one. A first effective change lifts a `NotStarted`
    /// record (freshly started or reset) to [`ProgressStatus::InProgress`].
    ///
    /// Terminal records are returned unchanged (after index validation).
    ///
    /// # Errors
    ///
    /// Returns [`ObjectiveOutOfRange`] if `index` does not name an objective
    /// of the definition.
    pub fn apply_objective(
        mut self,
        index: usize,
        change: ProgressChange,
        definition: &Quest,
        now: DateTime<Utc>,
    ) -> Result<Applied<Self>, ObjectiveOutOfRange> {
        let count = definition.objectives.len();
        let target = definition
            .objectives
            .get(index)
            .map(|o| o.target)
            .ok_or(ObjectiveOutOfRange { index, count })?;

        if self.status.is_terminal() {
            return Ok(Applied::unchanged(self));
        }

        let Some(entry) = self.objectives.get_mut(index) else {
            return Err(ObjectiveOutOfRange { index, count });
        };

        let value = apply_change(entry.current_value, change, target);
        let objective_completed_now = !entry.completed && value >= target;
        let changed = value != entry.current_value || objective_completed_now;

        entry.current_value = value;
        if objective_completed_now {
            entry.completed = true;
            entry.completed_at = Some(now);
        }

        let completed_now = self.objectives_complete() && self.status != ProgressStatus::Completed;
        if completed_now {
            self.status = ProgressStatus::Completed;
            self.completed_at = Some(now);
        } else if changed && self.status == ProgressStatus::NotStarted {
            self.status = ProgressStatus::InProgress;
        }

        Ok(Applied {
            record: self,
            changed: changed || completed_now,
            completed_now,
        })
    }

    /// Mark the quest expired. No-op on terminal records.
    #[must_use]
    pub fn mark_expired(self) -> Self {
        if self.status.can_transition_to(ProgressStatus::Expired) && !self.status.is_terminal() {
            Self {
                status: ProgressStatus::Expired,
                ..self
            }
        } else {
            self
        }
    }

    /// Mark the quest abandoned. No-op on terminal records.
    #[must_use]
    pub fn mark_failed(self) -> Self {
        if self.status.can_transition_to(ProgressStatus::Failed) && !self.status.is_terminal() {
            Self {
                status: ProgressStatus::Failed,
                ..self
            }
        } else {
            self
        }
    }

    /// Return the record to its initial state: zeroed objectives, cleared
    /// timestamps and reward flag. Identity and revision are kept.
    #[must_use]
    pub fn reset(self) -> Self {
        let objectives = self
            .objectives
            .iter()
            .map(|o| ObjectiveProgress::new(o.index))
            .collect();
        Self {
            objectives,
            status: ProgressStatus::NotStarted,
            rewards_collected: false,
            started_at: None,
            completed_at: None,
            expires_at: None,
            ..self
        }
    }
}

impl ProgressRecord for QuestProgress {
    type TargetId = QuestId;

    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn target_id(&self) -> &QuestId {
        &self.quest_id
    }

    fn status(&self) -> ProgressStatus {
        self.status
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn with_revision(self, revision: u64) -> Self {
        Self { revision, ..self }
    }

    fn rewards_collected(&self) -> bool {
        self.rewards_collected
    }

    fn with_rewards_collected(self, collected: bool) -> Self {
        Self {
            rewards_collected: collected,
            ..self
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::target::{Objective, Reward};
    use chrono::TimeZone;

    fn achievement(threshold: u32) -> Achievement {
        Achievement {
            id: AchievementId::new("ach-1"),
            name: "Test".to_string(),
            description: String::new(),
            threshold,
            reward: Reward::new(10, 5),
        }
    }

    fn quest(targets: &[u32]) -> Quest {
        Quest {
            id: QuestId::new("quest-1"),
            name: "Test".to_string(),
            description: String::new(),
            objectives: targets
                .iter()
                .map(|&target| Objective {
                    description: String::new(),
                    target,
                    source_event: None,
                })
                .collect(),
            reward: Reward::new(100, 50),
            time_limit_secs: None,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            ProgressStatus::NotStarted,
            ProgressStatus::InProgress,
            ProgressStatus::Completed,
            ProgressStatus::Failed,
            ProgressStatus::Expired,
        ] {
            assert_eq!(ProgressStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ProgressStatus::parse("DONE").is_err());
    }

    #[test]
    fn terminal_statuses_admit_nothing_else() {
        for terminal in [
            ProgressStatus::Completed,
            ProgressStatus::Failed,
            ProgressStatus::Expired,
        ] {
            assert!(terminal.is_terminal());
            assert!(terminal.can_transition_to(terminal));
            assert!(!terminal.can_transition_to(ProgressStatus::InProgress));
            assert!(!terminal.can_transition_to(ProgressStatus::NotStarted));
        }
        assert!(!ProgressStatus::InProgress.can_transition_to(ProgressStatus::NotStarted));
        assert!(ProgressStatus::InProgress.can_transition_to(ProgressStatus::Completed));
        assert!(ProgressStatus::NotStarted.can_transition_to(ProgressStatus::InProgress));
    }

    #[test]
    fn clamp_bounds() {
        assert_eq!(clamp_value(-5, 100), 0);
        assert_eq!(clamp_value(0, 100), 0);
        assert_eq!(clamp_value(40, 100), 40);
        assert_eq!(clamp_value(100, 100), 100);
        assert_eq!(clamp_value(1_000_000, 100), 100);
    }

    #[test]
    fn set_never_lowers_the_value() {
        assert_eq!(apply_change(70, ProgressChange::Set(40), 100), 70);
        assert_eq!(apply_change(40, ProgressChange::Set(70), 100), 70);
        assert_eq!(apply_change(40, ProgressChange::Set(-10), 100), 40);
    }

    #[test]
    fn add_saturates_at_clamp_bounds() {
        assert_eq!(apply_change(10, ProgressChange::Add(-20), 100), 0);
        assert_eq!(apply_change(90, ProgressChange::Add(20), 100), 100);
        assert_eq!(apply_change(10, ProgressChange::Add(i64::MAX), 100), 100);
    }

    #[test]
    fn derived_status_tracks_value() {
        assert_eq!(derive_status(0, 100), ProgressStatus::NotStarted);
        assert_eq!(derive_status(1, 100), ProgressStatus::InProgress);
        assert_eq!(derive_status(99, 100), ProgressStatus::InProgress);
        assert_eq!(derive_status(100, 100), ProgressStatus::Completed);
        assert_eq!(derive_status(250, 100), ProgressStatus::Completed);
    }

    #[test]
    fn achievement_completion_edge_fires_once() {
        let definition = achievement(100);
        let record = AchievementProgress::new(UserId::new("u1"), definition.id.clone());

        let first = record.apply(ProgressChange::Set(100), &definition, at(10));
        assert!(first.completed_now);
        assert_eq!(first.record.status, ProgressStatus::Completed);
        assert_eq!(first.record.completed_at, Some(at(10)));
        assert_eq!(first.record.started_at, Some(at(10)));

        let again = first.record.apply(ProgressChange::Set(100), &definition, at(20));
        assert!(!again.completed_now);
        assert!(!again.changed);
        assert_eq!(again.record.completed_at, Some(at(10)));
    }

    #[test]
    fn terminal_record_is_a_no_op() {
        let definition = achievement(10);
        let record = AchievementProgress {
            status: ProgressStatus::Failed,
            value: 3,
            ..AchievementProgress::new(UserId::new("u1"), definition.id.clone())
        };

        let applied = record.apply(ProgressChange::Add(5), &definition, at(0));
        assert!(!applied.changed);
        assert_eq!(applied.record.value, 3);
        assert_eq!(applied.record.status, ProgressStatus::Failed);
    }

    #[test]
    fn negative_add_keeps_status_forward() {
        let definition = achievement(100);
        let record = AchievementProgress::new(UserId::new("u1"), definition.id.clone());

        let forward = record.apply(ProgressChange::Add(1), &definition, at(1));
        assert_eq!(forward.record.status, ProgressStatus::InProgress);

        let back = forward.record.apply(ProgressChange::Add(-1), &definition, at(2));
        assert_eq!(back.record.value, 0);
        assert_eq!(back.record.status, ProgressStatus::InProgress);
    }

    #[test]
    fn achievement_reset_clears_reward_flag() {
        let definition = achievement(10);
        let record = AchievementProgress::new(UserId::new("u1"), definition.id.clone());
        let completed = record
            .apply(ProgressChange::Set(10), &definition, at(5))
            .record
            .with_rewards_collected(true)
            .with_revision(3);

        let fresh = completed.reset();
        assert_eq!(fresh.value, 0);
        assert_eq!(fresh.status, ProgressStatus::NotStarted);
        assert!(!fresh.rewards_collected);
        assert_eq!(fresh.started_at, None);
        assert_eq!(fresh.completed_at, None);
        assert_eq!(fresh.revision, 3);
    }

    #[test]
    fn started_quest_stays_not_started_until_first_change() {
        let definition = quest(&[5]);
        let record = QuestProgress::start(UserId::new("u1"), &definition, at(0));
        assert_eq!(record.status, ProgressStatus::NotStarted);
        assert_eq!(record.started_at, Some(at(0)));

        let untouched = record
            .apply_objective(0, ProgressChange::Add(0), &definition, at(1))
            .unwrap();
        assert!(!untouched.changed);
        assert_eq!(untouched.record.status, ProgressStatus::NotStarted);

        let advanced = untouched
            .record
            .apply_objective(0, ProgressChange::Add(1), &definition, at(2))
            .unwrap();
        assert!(advanced.changed);
        assert_eq!(advanced.record.status, ProgressStatus::InProgress);
    }

    #[test]
    fn quest_completes_when_last_objective_does() {
        let definition = quest(&[1000, 5]);
        let record = QuestProgress::start(UserId::new("u1"), &definition, at(0));
        assert_eq!(record.status, ProgressStatus::NotStarted);
        assert_eq!(record.objectives.len(), 2);

        let first = record
            .apply_objective(0, ProgressChange::Set(1000), &definition, at(1))
            .unwrap();
        assert!(!first.completed_now);
        assert!(first.changed);
        assert!(first.record.objectives[0].completed);
        assert_eq!(first.record.status, ProgressStatus::InProgress);

        let second = first
            .record
            .apply_objective(1, ProgressChange::Set(5), &definition, at(2))
            .unwrap();
        assert!(second.completed_now);
        assert_eq!(second.record.status, ProgressStatus::Completed);
        assert_eq!(second.record.completed_at, Some(at(2)));
    }

    #[test]
    fn objective_values_clamp_per_objective() {
        let definition = quest(&[3, 10]);
        let record = QuestProgress::start(UserId::new("u1"), &definition, at(0));

        let applied = record
            .apply_objective(0, ProgressChange::Set(50), &definition, at(1))
            .unwrap();
        assert_eq!(applied.record.objectives[0].current_value, 3);
        assert!(applied.record.objectives[0].completed);
        assert_eq!(applied.record.objectives[1].current_value, 0);
    }

    #[test]
    fn objective_index_out_of_range_is_rejected() {
        let definition = quest(&[5]);
        let record = QuestProgress::start(UserId::new("u1"), &definition, at(0));

        let err = record
            .apply_objective(3, ProgressChange::Add(1), &definition, at(1))
            .unwrap_err();
        assert_eq!(err.index, 3);
        assert_eq!(err.count, 1);
    }

    #[test]
    fn quest_expiry_and_abandon_are_terminal() {
        let definition = quest(&[5]);
        let mut timed = definition.clone();
        timed.time_limit_secs = Some(60);

        let record = QuestProgress::start(UserId::new("u1"), &timed, at(0));
        assert_eq!(record.expires_at, Some(at(60)));
        assert!(!record.is_expired(at(59)));
        assert!(record.is_expired(at(60)));

        let expired = record.mark_expired();
        assert_eq!(expired.status, ProgressStatus::Expired);
        assert_eq!(expired.clone().mark_failed().status, ProgressStatus::Expired);

        let fresh = QuestProgress::start(UserId::new("u1"), &definition, at(0));
        assert_eq!(fresh.mark_failed().status, ProgressStatus::Failed);
    }

    #[test]
    fn quest_reset_zeroes_objectives() {
        let definition = quest(&[2, 2]);
        let record = QuestProgress::start(UserId::new("u1"), &definition, at(0));
        let advanced = record
            .apply_objective(0, ProgressChange::Set(2), &definition, at(1))
            .unwrap()
            .record;

        let fresh = advanced.reset();
        assert_eq!(fresh.status, ProgressStatus::NotStarted);
        assert!(fresh.objectives.iter().all(|o| o.current_value == 0 && !o.completed));
        assert_eq!(fresh.started_at, None);
        assert_eq!(fresh.expires_at, None);

        let resumed = fresh
            .apply_objective(1, ProgressChange::Add(1), &definition, at(2))
            .unwrap();
        assert!(resumed.changed);
        assert_eq!(resumed.record.status, ProgressStatus::InProgress);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn clamp_stays_within_bounds(raw in i64::MIN..i64::MAX, limit in 1u32..1_000_000) {
                let clamped = clamp_value(raw, limit);
                prop_assert!(clamped <= limit);
            }

            #[test]
            fn apply_change_stays_within_bounds(
                current in 0u32..1_000_000,
                delta in i64::MIN..i64::MAX,
                limit in 1u32..1_000_000,
            ) {
                let current = current.min(limit);
                for change in [ProgressChange::Set(delta), ProgressChange::Add(delta)] {
                    let next = apply_change(current, change, limit);
                    prop_assert!(next <= limit);
                }
            }

            #[test]
            fn set_is_monotonic(
                a in 0i64..1_000_000,
                b in 0i64..1_000_000,
                limit in 1u32..1_000_000,
            ) {
                let one_way = apply_change(
                    apply_change(0, ProgressChange::Set(a), limit),
                    ProgressChange::Set(b),
                    limit,
                );
                let other_way = apply_change(
                    apply_change(0, ProgressChange::Set(b), limit),
                    ProgressChange::Set(a),
                    limit,
                );
                prop_assert_eq!(one_way, other_way);
                prop_assert_eq!(one_way, clamp_value(a.max(b), limit));
            }
        }
    }
}
