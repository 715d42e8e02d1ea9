//! Quest lifecycle and objective updates.

use crate::error::TrackerError;
use crate::publish::{publish_json, publish_record};
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::reward::RewardDispatcher;
use questline_bus::EventBus;
use questline_core::events;
use questline_core::{
    Applied, Clock, EventContext, ProgressChange, ProgressStatus, ProgressStore, QuestCatalog,
    QuestId, QuestProgress, SystemClock, UserDirectory, UserId,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// What one objective update did to the record.
enum Attempt {
    /// The time limit had elapsed; the record was marked expired and the
    /// change was not applied.
    Expired(QuestProgress),
    /// The change was applied (or was a no-op).
    Applied(Applied<QuestProgress>),
}

/// Drives one user's progress through quest definitions.
///
/// Objective updates lazily create the record on first touch, so quests
/// progress without an explicit [`start`](Self::start). Completing the
/// last objective completes the quest, publishes `quest.completed`, and
/// grants the definition's reward through the [`RewardDispatcher`].
/// Time-limited quests expire lazily, on the first update after the limit
/// elapses.
pub struct QuestTracker {
    catalog: Arc<dyn QuestCatalog>,
    store: Arc<dyn ProgressStore<QuestProgress>>,
    bus: Arc<EventBus>,
    rewards: RewardDispatcher<QuestProgress>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl QuestTracker {
    /// Create a tracker over the given collaborators.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn QuestCatalog>,
        store: Arc<dyn ProgressStore<QuestProgress>>,
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

    /// Start a quest for a user.
    ///
    /// Creates the record `NotStarted` with one zeroed entry per definition
    /// objective, starts the expiry countdown for time-limited quests, then
    /// publishes `quest.started`. The first effective objective update lifts
    /// the record to `InProgress`.
    ///
    /// # Errors
    ///
    /// [`TrackerError::QuestNotFound`] for unknown definitions,
    /// [`TrackerError::QuestAlreadyStarted`] when the user already has a
    /// record for the quest, and store errors from the insert.
    pub async fn start(
        &self,
        user_id: UserId,
        quest_id: QuestId,
    ) -> Result<QuestProgress, TrackerError> {
        let definition = self
            .catalog
            .find(&quest_id)
            .await?
            .ok_or_else(|| TrackerError::QuestNotFound(quest_id.clone()))?;

        let record = retry_with_predicate(
            &self.retry,
            || {
                let store = Arc::clone(&self.store);
                let definition = definition.clone();
                let user_id = user_id.clone();
                let quest_id = quest_id.clone();
                let now = self.clock.now();
                async move {
                    if let Some(existing) = store.find(&user_id, &quest_id).await? {
                        return Err(TrackerError::QuestAlreadyStarted {
                            user_id: user_id.clone(),
                            quest_id: existing.quest_id,
                        });
                    }
                    let fresh = QuestProgress::start(user_id.clone(), &definition, now);
                    Ok(store.upsert(fresh).await?)
                }
            },
            TrackerError::is_retryable,
        )
        .await?;

        metrics::counter!("tracker.quests_started").increment(1);
        tracing::info!(
            user_id = %record.user_id,
            quest_id = %record.quest_id,
            "quest started"
        );
        let context = EventContext::for_user(user_id, Uuid::new_v4().to_string());
        publish_record(&self.bus, events::quest::STARTED, &record, context).await;
        Ok(record)
    }

    /// Apply a change to one objective of a user's quest.
    ///
    /// A missing record is created on the spot, as if the quest had just
    /// been started. The objective value clamps to `[0, target]`; completing
    /// the last outstanding objective completes the quest, publishes
    /// `quest.completed`, and grants the reward. If the quest's time limit
    /// has already elapsed the record is marked expired instead and the
    /// change is dropped; callers see the expired record, not an error.
    ///
    /// A completed record whose reward grant previously failed retries the
    /// grant here, even when the change itself is a no-op.
    ///
    /// # Errors
    ///
    /// [`TrackerError::QuestNotFound`] for unknown definitions,
    /// [`TrackerError::Objective`] for an index outside the definition, and
    /// store or grant errors.
    pub async fn update_objective(
        &self,
        user_id: UserId,
        quest_id: QuestId,
        index: usize,
        change: ProgressChange,
    ) -> Result<QuestProgress, TrackerError> {
        let definition = self
            .catalog
            .find(&quest_id)
            .await?
            .ok_or_else(|| TrackerError::QuestNotFound(quest_id.clone()))?;

        let attempt = retry_with_predicate(
            &self.retry,
            || {
                let store = Arc::clone(&self.store);
                let definition = definition.clone();
                let user_id = user_id.clone();
                let quest_id = quest_id.clone();
                let now = self.clock.now();
                async move {
                    let current = match store.find(&user_id, &quest_id).await? {
                        Some(existing) => existing,
                        // First touch starts the quest implicitly.
                        None => QuestProgress::start(user_id.clone(), &definition, now),
                    };

                    if current.is_expired(now) {
                        let stored = store.upsert(current.mark_expired()).await?;
                        return Ok(Attempt::Expired(stored));
                    }

                    let Applied {
                        record,
                        changed,
                        completed_now,
                    } = current.apply_objective(index, change, &definition, now)?;

                    let record = if changed {
                        store.upsert(record).await?
                    } else {
                        record
                    };
                    Ok(Attempt::Applied(Applied {
                        record,
                        changed,
                        completed_now,
                    }))
                }
            },
            TrackerError::is_retryable,
        )
        .await?;

        let Applied {
            record,
            changed,
            completed_now,
        } = match attempt {
            Attempt::Expired(record) => {
                metrics::counter!("tracker.quests_expired").increment(1);
                tracing::info!(
                    user_id = %record.user_id,
                    quest_id = %record.quest_id,
                    "quest expired before the update applied"
                );
                let context = EventContext::for_user(user_id, Uuid::new_v4().to_string());
                publish_record(&self.bus, events::quest::PROGRESS_UPDATED, &record, context).await;
                return Ok(record);
            }
            Attempt::Applied(applied) => applied,
        };

        let grant_pending =
            record.status == ProgressStatus::Completed && !record.rewards_collected;
        if !changed && !grant_pending {
            return Ok(record);
        }

        let context = EventContext::for_user(user_id, Uuid::new_v4().to_string());

        if changed {
            publish_record(
                &self.bus,
                events::quest::PROGRESS_UPDATED,
                &record,
                context.clone(),
            )
            .await;
        }

        if completed_now {
            metrics::counter!("tracker.completions", "kind" => "quest").increment(1);
            tracing::info!(
                user_id = %record.user_id,
                quest_id = %record.quest_id,
                "quest completed"
            );
            publish_json(
                &self.bus,
                events::quest::COMPLETED,
                json!({
                    "userId": record.user_id.as_str(),
                    "questId": record.quest_id.as_str(),
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

    /// Mark a user's quest abandoned.
    ///
    /// Needs no definition lookup, so quests retired from the catalog can
    /// still be abandoned. Finished records are returned unchanged.
    ///
    /// # Errors
    ///
    /// [`TrackerError::QuestNotStarted`] when the user has no record for
    /// the quest, and store errors from the write.
    pub async fn abandon(
        &self,
        user_id: UserId,
        quest_id: QuestId,
    ) -> Result<QuestProgress, TrackerError> {
        let (record, wrote) = retry_with_predicate(
            &self.retry,
            || {
                let store = Arc::clone(&self.store);
                let user_id = user_id.clone();
                let quest_id = quest_id.clone();
                async move {
                    let current = store
                        .find(&user_id, &quest_id)
                        .await?
                        .ok_or(TrackerError::QuestNotStarted { user_id, quest_id })?;

                    let marked = current.clone().mark_failed();
                    if marked.status == current.status {
                        return Ok((current, false));
                    }
                    Ok((store.upsert(marked).await?, true))
                }
            },
            TrackerError::is_retryable,
        )
        .await?;

        if wrote {
            metrics::counter!("tracker.quests_abandoned").increment(1);
            tracing::info!(
                user_id = %record.user_id,
                quest_id = %record.quest_id,
                "quest abandoned"
            );
            let context = EventContext::for_user(user_id, Uuid::new_v4().to_string());
            publish_record(&self.bus, events::quest::PROGRESS_UPDATED, &record, context).await;
        }
        Ok(record)
    }

    /// Return a user's record for one quest to its initial state.
    ///
    /// The record drops back to `NotStarted` with zeroed objectives and a
    /// cleared reward flag; later objective updates rebuild it from zero,
    /// and a fresh completion grants again. Resetting an already-pristine
    /// record writes nothing.
    ///
    /// # Errors
    ///
    /// [`TrackerError::QuestNotStarted`] when the user has no record at
    /// all, and store errors from the write.
    pub async fn reset(
        &self,
        user_id: UserId,
        quest_id: QuestId,
    ) -> Result<QuestProgress, TrackerError> {
        let (record, wrote) = retry_with_predicate(
            &self.retry,
            || {
                let store = Arc::clone(&self.store);
                let user_id = user_id.clone();
                let quest_id = quest_id.clone();
                async move {
                    let current = store
                        .find(&user_id, &quest_id)
                        .await?
                        .ok_or(TrackerError::QuestNotStarted { user_id, quest_id })?;

                    let reset = current.clone().reset();
                    if reset == current {
                        return Ok((current, false));
                    }
                    Ok((store.upsert(reset).await?, true))
                }
            },
            TrackerError::is_retryable,
        )
        .await?;

        if wrote {
            tracing::info!(
                user_id = %record.user_id,
                quest_id = %record.quest_id,
                "quest progress reset"
            );
            let context = EventContext::for_user(user_id, Uuid::new_v4().to_string());
            publish_record(&self.bus, events::quest::PROGRESS_UPDATED, &record, context).await;
        }
        Ok(record)
    }

    /// Look up a user's record for one quest.
    ///
    /// # Errors
    ///
    /// Store errors from the lookup.
    pub async fn progress(
        &self,
        user_id: &UserId,
        quest_id: &QuestId,
    ) -> Result<Option<QuestProgress>, TrackerError> {
        Ok(self.store.find(user_id, quest_id).await?)
    }

    /// All of a user's quest records, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Store errors from the query.
    pub async fn progress_for_user(
        &self,
        user_id: &UserId,
        status: Option<ProgressStatus>,
    ) -> Result<Vec<QuestProgress>, TrackerError> {
        Ok(self.store.find_by_user(user_id, status).await?)
    }
}
