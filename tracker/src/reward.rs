//! Idempotent reward dispatch.
//!
//! Completing a target grants its reward once. The persisted
//! `rewards_collected` flag is the idempotence token: grants run first and
//! the flag flips after, so a failed grant leaves the flag clear and the
//! next update for the same record retries the grant, while a flipped flag
//! short-circuits every later attempt.

use crate::error::TrackerError;
use crate::publish::publish_json;
use crate::retry::{RetryPolicy, retry_with_predicate};
use questline_bus::EventBus;
use questline_core::events;
use questline_core::{
    EventContext, ProgressRecord, ProgressStore, Reward, StoreError, UserDirectory,
};
use serde_json::json;
use std::sync::Arc;

/// Grants rewards for completed targets and marks them collected.
///
/// Generic over the record shape so achievement and quest completions share
/// one dispatch path.
pub struct RewardDispatcher<R: ProgressRecord> {
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn ProgressStore<R>>,
    bus: Arc<EventBus>,
    retry: RetryPolicy,
}

impl<R: ProgressRecord> RewardDispatcher<R> {
    /// Create a dispatcher with the default retry policy.
    #[must_use]
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn ProgressStore<R>>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            directory,
            store,
            bus,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy for the flag-flip write.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Grant `reward` for a completed record, at most once per completion.
    ///
    /// Already-collected records return unchanged without touching the
    /// directory. Otherwise points and experience are credited, the record
    /// is re-persisted with `rewards_collected` set, and
    /// `user.points.added` / `user.experience.added` events go out
    /// best-effort. Grants run before the flag flips, so the directory may
    /// see a rare repeat grant when the flip itself fails; it never sees a
    /// completion whose grant was silently skipped.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Grant`] when the directory rejects a credit
    /// (the flag stays clear so a later update retries) and
    /// [`TrackerError::Store`] when the flag flip fails outside the retry
    /// budget.
    pub async fn dispatch(
        &self,
        record: R,
        reward: Reward,
        context: &EventContext,
    ) -> Result<R, TrackerError> {
        if record.rewards_collected() {
            return Ok(record);
        }

        let user_id = record.user_id().clone();
        let target_id = record.target_id().clone();

        if reward.points > 0 {
            self.directory.grant_points(&user_id, reward.points).await?;
        }
        if reward.experience > 0 {
            self.directory
                .grant_experience(&user_id, reward.experience)
                .await?;
        }

        // A conflict on the flip means another writer touched the record
        // since our caller persisted it, so re-read and flip whatever is
        // stored now. A re-read that already shows the flag set means a
        // concurrent dispatch won the race.
        let collected = retry_with_predicate(
            &self.retry,
            || {
                let store = Arc::clone(&self.store);
                let user_id = user_id.clone();
                let target_id = target_id.clone();
                let fallback = record.clone();
                async move {
                    let current = store.find(&user_id, &target_id).await?.unwrap_or(fallback);
                    if current.rewards_collected() {
                        return Ok(current);
                    }
                    store.upsert(current.with_rewards_collected(true)).await
                }
            },
            StoreError::is_retryable,
        )
        .await?;

        if reward.is_empty() {
            tracing::debug!(
                user_id = %user_id,
                target_id = %target_id,
                "completion carries no reward, marked collected"
            );
            return Ok(collected);
        }

        metrics::counter!("tracker.rewards_granted").increment(1);
        tracing::info!(
            user_id = %user_id,
            target_id = %target_id,
            points = reward.points,
            experience = reward.experience,
            "rewards granted"
        );

        if reward.points > 0 {
            publish_json(
                &self.bus,
                events::user::POINTS_ADDED,
                json!({
                    "userId": user_id.as_str(),
                    "points": reward.points,
                    "source": target_id.to_string(),
                }),
                context.clone(),
            )
            .await;
        }
        if reward.experience > 0 {
            publish_json(
                &self.bus,
                events::user::EXPERIENCE_ADDED,
                json!({
                    "userId": user_id.as_str(),
                    "experience": reward.experience,
                    "source": target_id.to_string(),
                }),
                context.clone(),
            )
            .await;
        }

        Ok(collected)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use questline_core::progress::{AchievementProgress, ProgressStatus};
    use questline_core::target::{AchievementId, UserId};
    use questline_testing::{
        Grant, InMemoryProgressStore, InMemorySpool, InMemoryTransport, RecordingUserDirectory,
    };

    async fn test_bus() -> Arc<EventBus> {
        let bus = EventBus::builder()
            .transport(Arc::new(InMemoryTransport::new()))
            .spool(Arc::new(InMemorySpool::new()))
            .source("tracker-tests")
            .build()
            .unwrap();
        bus.initialize().await.unwrap();
        Arc::new(bus)
    }

    fn completed_record(store: &InMemoryProgressStore<AchievementProgress>) -> AchievementProgress {
        let mut record =
            AchievementProgress::new(UserId::new("u1"), AchievementId::new("first-blood"));
        record.status = ProgressStatus::Completed;
        let record = record.with_revision(1);
        store.seed(record.clone());
        record
    }

    #[tokio::test]
    async fn collected_record_short_circuits() {
        let directory = RecordingUserDirectory::new();
        let store = InMemoryProgressStore::new();
        let record = completed_record(&store).with_rewards_collected(true);
        store.seed(record.clone());
        let dispatcher = RewardDispatcher::new(
            Arc::new(directory.clone()),
            Arc::new(store),
            test_bus().await,
        );

        let reward = Reward {
            points: 100,
            experience: 50,
        };
        let out = dispatcher
            .dispatch(record, reward, &EventContext::default())
            .await
            .unwrap();

        assert!(out.rewards_collected);
        assert!(directory.grants().is_empty());
    }

    #[tokio::test]
    async fn empty_reward_flips_flag_without_grants() {
        let directory = RecordingUserDirectory::new();
        let store = InMemoryProgressStore::new();
        let record = completed_record(&store);
        let dispatcher = RewardDispatcher::new(
            Arc::new(directory.clone()),
            Arc::new(store.clone()),
            test_bus().await,
        );

        let out = dispatcher
            .dispatch(record, Reward::default(), &EventContext::default())
            .await
            .unwrap();

        assert!(out.rewards_collected);
        assert!(directory.grants().is_empty());
        assert!(store.records()[0].rewards_collected);
    }

    #[tokio::test]
    async fn grant_failure_leaves_flag_clear() {
        let directory = RecordingUserDirectory::new();
        directory.set_failure(Some(questline_core::GrantError::Failed(
            "identity service down".to_string(),
        )));
        let store = InMemoryProgressStore::new();
        let record = completed_record(&store);
        let dispatcher = RewardDispatcher::new(
            Arc::new(directory.clone()),
            Arc::new(store.clone()),
            test_bus().await,
        );

        let reward = Reward {
            points: 100,
            experience: 0,
        };
        let err = dispatcher
            .dispatch(record, reward, &EventContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, TrackerError::Grant(_)));
        assert!(!store.records()[0].rewards_collected);
    }

    #[tokio::test]
    async fn grants_points_then_experience_and_marks_collected() {
        let directory = RecordingUserDirectory::new();
        let store = InMemoryProgressStore::new();
        let record = completed_record(&store);
        let user_id = record.user_id().clone();
        let dispatcher = RewardDispatcher::new(
            Arc::new(directory.clone()),
            Arc::new(store.clone()),
            test_bus().await,
        );

        let reward = Reward {
            points: 100,
            experience: 50,
        };
        let out = dispatcher
            .dispatch(record, reward, &EventContext::default())
            .await
            .unwrap();

        assert!(out.rewards_collected);
        assert_eq!(
            directory.grants(),
            vec![
                Grant::Points {
                    user_id: user_id.clone(),
                    amount: 100
                },
                Grant::Experience {
                    user_id,
                    amount: 50
                },
            ]
        );
        assert!(store.records()[0].rewards_collected);
    }
}
