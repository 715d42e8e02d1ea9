//! Achievement progress updates.

use crate::error::TrackerError;
use crate::publish::{publish_json, publish_record};
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::reward::RewardDispatcher;
use questline_bus::EventBus;
use questline_core::events;
use questline_core::{
    AchievementCatalog, AchievementId, AchievementProgress, Applied, Clock, EventContext,
    ProgressChange, ProgressStatus, ProgressStore, StoreError, SystemClock, UserDirectory, UserId,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Drives one user's progress toward achievement definitions.
///
/// Updates are read-modify-write against the progress store, retried on
/// revision conflicts. Crossing the completion threshold emits
/// `achievement.completed` and hands the definition's reward to the
/// [`RewardDispatcher`] exactly once per completion.
pub struct AchievementTracker {
    catalog: Arc<dyn AchievementCatalog>,
    store: Arc<dyn ProgressStore<AchievementProgress>>,
    bus: Arc<EventBus>,
    rewards: RewardDispatcher<AchievementProgress>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl AchievementTracker {
    /// Create a tracker over the given collaborators.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn AchievementCatalog>,
        store: Arc<dyn ProgressStore<AchievementProgress>>,
        directory: Arc<dyn UserDirectory>,
        bus: Arc<EventBus>,
    ) -> Self {
        let rewards = RewardDispatcher::new(directory, Arc::clone(&store), Arc::clone(&bus));
        Self {
            catalog,
            store,
            bus,
            rewards,
            retry: RetryPolicy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock, for tests that pin time.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the conflict retry policy, here and in reward dispatch.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.rewards = self.rewards.with_retry_policy(retry.clone());
        self.retry = retry;
        self
    }

    /// Apply a change to a user's progress on one achievement.
    ///
    /// Missing records start from zero. The value clamps to
    /// `[0, threshold]` and the status follows it; reaching the threshold
    /// completes the achievement, publishes `achievement.completed`, and
    /// grants the reward. A change that alters nothing writes nothing and
    /// publishes nothing.
    ///
    /// A completed record whose reward grant previously failed retries the
    /// grant here, even when the change itself is a no-op.
    ///
    /// # Errors
    ///
    /// [`TrackerError::AchievementNotFound`] for unknown definitions, and
    /// store or grant errors from persisting the update and dispatching the
    /// reward.
    pub async fn update(
        &self,
        user_id: UserId,
        achievement_id: AchievementId,
        change: ProgressChange,
    ) -> Result<AchievementProgress, TrackerError> {
        let definition = self
            .catalog
            .find(&achievement_id)
            .await?
            .ok_or_else(|| TrackerError::AchievementNotFound(achievement_id.clone()))?;

        let Applied {
            record,
            changed,
            completed_now,
        } = retry_with_predicate(
            &self.retry,
            || {
                let store = Arc::clone(&self.store);
                let definition = definition.clone();
                let user_id = user_id.clone();
                let achievement_id = achievement_id.clone();
                let now = self.clock.now();
                async move {
                    let current = store.find(&user_id, &achievement_id).await?.unwrap_or_else(
                        || AchievementProgress::new(user_id.clone(), achievement_id.clone()),
                    );

                    let Applied {
                        record,
                        changed,
                        completed_now,
                    } = current.apply(change, &definition, now);

                    if !changed {
                        return Ok(Applied {
                            record,
                            changed,
                            completed_now,
                        });
                    }
                    let record = store.upsert(record).await?;
                    Ok(Applied {
                        record,
                        changed,
                        completed_now,
                    })
                }
            },
            StoreError::is_retryable,
        )
        .await?;

        let grant_pending =
            record.status == ProgressStatus::Completed && !record.rewards_collected;
        if !changed && !grant_pending {
            return Ok(record);
        }

        let context = EventContext::for_user(user_id, Uuid::new_v4().to_string());

        if changed {
            publish_record(
                &self.bus,
                events::achievement::PROGRESS_UPDATED,
                &record,
                context.clone(),
            )
            .await;
        }

        if completed_now {
            metrics::counter!("tracker.completions", "kind" => "achievement").increment(1);
            tracing::info!(
                user_id = %record.user_id,
                achievement_id = %record.achievement_id,
                "achievement completed"
            );
            publish_json(
                &self.bus,
                events::achievement::COMPLETED,
                json!({
                    "userId": record.user_id.as_str(),
                    "achievementId": record.achievement_id.as_str(),
                    "name": definition.name,
                    "reward": definition.reward,
                }),
                context.clone(),
            )
            .await;
        }

        if grant_pending {
            return self.rewards.dispatch(record, definition.reward, &context).await;
        }
        Ok(record)
    }

    /// Return a user's record for one achievement to its initial state.
    ///
    /// The reward flag clears with the rest, so completing again after a
    /// reset grants again. Resetting a missing or already-pristine record
    /// writes nothing.
    ///
    /// # Errors
    ///
    /// Store errors from the conditional write.
    pub async fn reset(
        &self,
        user_id: UserId,
        achievement_id: AchievementId,
    ) -> Result<AchievementProgress, TrackerError> {
        // (record, wrote) so a pristine record skips the publish below.
        let outcome = retry_with_predicate(
            &self.retry,
            || {
                let store = Arc::clone(&self.store);
                let user_id = user_id.clone();
                let achievement_id = achievement_id.clone();
                async move {
                    let Some(current) = store.find(&user_id, &achievement_id).await? else {
                        return Ok(None);
                    };
                    let reset = current.clone().reset();
                    if reset == current {
                        return Ok(Some((current, false)));
                    }
                    let stored = store.upsert(reset).await?;
                    Ok(Some((stored, true)))
                }
            },
            StoreError::is_retryable,
        )
        .await?;

        let Some((record, wrote)) = outcome else {
            return Ok(AchievementProgress::new(user_id, achievement_id));
        };
        if !wrote {
            return Ok(record);
        }

        tracing::info!(
            user_id = %record.user_id,
            achievement_id = %record.achievement_id,
            "achievement progress reset"
        );
        let context = EventContext::for_user(user_id, Uuid::new_v4().to_string());
        publish_record(
            &self.bus,
            events::achievement::PROGRESS_UPDATED,
            &record,
            context,
        )
        .await;
        Ok(record)
    }

    /// Look up a user's record for one achievement.
    ///
    /// # Errors
    ///
    /// Store errors from the lookup.
    pub async fn progress(
        &self,
        user_id: &UserId,
        achievement_id: &AchievementId,
    ) -> Result<Option<AchievementProgress>, TrackerError> {
        Ok(self.store.find(user_id, achievement_id).await?)
    }

    /// All of a user's achievement records, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Store errors from the query.
    pub async fn progress_for_user(
        &self,
        user_id: &UserId,
        status: Option<ProgressStatus>,
    ) -> Result<Vec<AchievementProgress>, TrackerError> {
        Ok(self.store.find_by_user(user_id, status).await?)
    }
}
