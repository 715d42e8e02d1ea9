//! Feeds domain events into quest objectives.

use crate::error::TrackerError;
use crate::quest::QuestTracker;
use async_trait::async_trait;
use questline_bus::{EventHandler, HandlerError};
use questline_core::{EventEnvelope, ProgressChange, QuestCatalog};
use std::sync::Arc;

/// Advances event-fed quest objectives from the event stream.
///
/// Quest objectives may name a `source_event`; every consumed event whose
/// type matches bumps that objective by one for the event's user. Which
/// events reach this handler is decided by the queue bindings it is
/// subscribed under, so a deployment feeding quests from `enemy.*` binds
/// exactly that.
///
/// Events without a `userId` in their metadata cannot be attributed and are
/// skipped. A user's first matching event creates their quest record on the
/// spot. A failure on any matched objective fails the delivery so the broker
/// redelivers it; updates that already applied are no-ops on redelivery only
/// if the objective had hit its target, so a redelivered event can bump an
/// unfinished objective twice. That is the at-least-once trade.
pub struct QuestFeedHandler {
    catalog: Arc<dyn QuestCatalog>,
    tracker: Arc<QuestTracker>,
}

impl QuestFeedHandler {
    /// Create a handler feeding the given tracker.
    #[must_use]
    pub fn new(catalog: Arc<dyn QuestCatalog>, tracker: Arc<QuestTracker>) -> Self {
        Self { catalog, tracker }
    }
}

#[async_trait]
impl EventHandler for QuestFeedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let Some(user_id) = envelope.metadata.user_id.clone() else {
            tracing::debug!(
                event_type = %envelope.event_type,
                "event carries no user, nothing to attribute"
            );
            return Ok(());
        };

        let quests = self.catalog.all().await.map_err(TrackerError::from)?;
        let mut first_failure: Option<TrackerError> = None;

        for quest in quests {
            for (index, objective) in quest.objectives.iter().enumerate() {
                if objective.source_event.as_deref() != Some(envelope.event_type.as_str()) {
                    continue;
                }

                match self
                    .tracker
                    .update_objective(
                        user_id.clone(),
                        quest.id.clone(),
                        index,
                        ProgressChange::Add(1),
                    )
                    .await
                {
                    Ok(record) => {
                        tracing::debug!(
                            user_id = %user_id,
                            quest_id = %quest.id,
                            index,
                            status = %record.status,
                            "event-fed objective advanced"
                        );
                    }
                    Err(TrackerError::QuestNotFound(_)) => {
                        tracing::debug!(
                            user_id = %user_id,
                            quest_id = %quest.id,
                            "event matched a quest no longer in the catalog"
                        );
                    }
                    Err(err) => {
                        tracing::error!(
                            user_id = %user_id,
                            quest_id = %quest.id,
                            index,
                            error = %err,
                            "event-fed objective update failed"
                        );
                        first_failure.get_or_insert(err);
                    }
                }
            }
        }

        if let Some(err) = first_failure {
            return Err(err.into());
        }
        Ok(())
    }
}
