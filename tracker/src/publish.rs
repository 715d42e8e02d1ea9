//! Best-effort event publication for trackers.
//!
//! By the time a tracker publishes, the progress update is already persisted.
//! The bus degrades to its spool when the broker is unreachable, so a publish
//! error here is rare; when one still surfaces it is logged and dropped
//! rather than failing an update the store has committed.

use questline_bus::EventBus;
use questline_core::{EventContext, ProgressRecord};
use serde::Serialize;

/// Publish a JSON payload, logging instead of propagating failure.
pub(crate) async fn publish_json(
    bus: &EventBus,
    event_type: &str,
    data: serde_json::Value,
    context: EventContext,
) {
    if let Err(err) = bus.publish_with_context(event_type, data, context).await {
        tracing::warn!(
            event_type,
            error = %err,
            "event publication failed for a persisted update"
        );
    }
}

/// Publish a progress record as the event payload.
pub(crate) async fn publish_record<R>(
    bus: &EventBus,
    event_type: &str,
    record: &R,
    context: EventContext,
) where
    R: ProgressRecord + Serialize,
{
    match serde_json::to_value(record) {
        Ok(data) => publish_json(bus, event_type, data, context).await,
        Err(err) => {
            tracing::error!(event_type, error = %err, "progress record did not serialize");
        }
    }
}
