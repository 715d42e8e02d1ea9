//! The wire envelope wrapping every published domain event.
//!
//! Envelopes travel as JSON. The shape is fixed by contract with the other
//! services consuming these events:
//!
//! ```json
//! {
//!   "type": "achievement.progress.updated",
//!   "data": { "userId": "u-1", "value": 40 },
//!   "metadata": {
//!     "timestamp": "2026-01-05T12:00:00Z",
//!     "source": "questline",
//!     "version": "1.0",
//!     "correlationId": "8f2c...",
//!     "userId": "u-1"
//!   }
//! }
//! ```
//!
//! Field names are camelCase on the wire; `correlationId` and `userId` are
//! omitted entirely when absent. Anything that does not decode into this
//! shape is [`CodecError::Malformed`] and is the one consume-side error that
//! must never be retried.

use crate::target::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version stamped into every envelope's metadata.
pub const WIRE_VERSION: &str = "1.0";

/// Errors from envelope encoding and decoding.
#[derive(Error, Debug, Clone)]
pub enum CodecError {
    /// The envelope could not be serialized to JSON.
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    /// The bytes are not a valid envelope. Not retryable.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Delivery metadata carried alongside every event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// When the event was produced. Replayed events keep their original
    /// timestamp.
    pub timestamp: DateTime<Utc>,
    /// Name of the emitting service.
    pub source: String,
    /// Wire format version, see [`WIRE_VERSION`].
    pub version: String,
    /// Correlates the events of one logical operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// The user the event concerns, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// A domain event as it travels on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Dot-delimited event type, e.g. `quest.progress.updated`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload. Opaque to the delivery machinery.
    pub data: serde_json::Value,
    /// Delivery metadata.
    pub metadata: EventMetadata,
}

impl EventEnvelope {
    /// Serialize the envelope to its JSON byte representation.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Deserialize an envelope from its JSON byte representation.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] for anything that is not a valid
    /// envelope: invalid JSON, a missing field, or an empty event type.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
        if envelope.event_type.is_empty() {
            return Err(CodecError::Malformed("empty event type".to_string()));
        }
        Ok(envelope)
    }
}

/// Optional correlation carried from the triggering operation into the
/// envelopes it emits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventContext {
    /// Correlates the events of one logical operation.
    pub correlation_id: Option<String>,
    /// The user the operation concerns.
    pub user_id: Option<UserId>,
}

impl EventContext {
    /// A context correlating events for one user under a fresh correlation id.
    #[must_use]
    pub fn for_user(user_id: UserId, correlation_id: String) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            user_id: Some(user_id),
        }
    }
}

/// Builds envelopes on behalf of one emitting service.
///
/// The codec is pure: callers supply the timestamp, so replay can preserve
/// the original production time and tests can pin the clock.
#[derive(Clone, Debug)]
pub struct EnvelopeCodec {
    source: String,
}

impl EnvelopeCodec {
    /// A codec stamping envelopes with the given service name.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Wrap a payload into a complete envelope.
    #[must_use]
    pub fn seal(
        &self,
        event_type: &str,
        data: serde_json::Value,
        context: EventContext,
        timestamp: DateTime<Utc>,
    ) -> EventEnvelope {
        EventEnvelope {
            event_type: event_type.to_string(),
            data,
            metadata: EventMetadata {
                timestamp,
                source: self.source.clone(),
                version: WIRE_VERSION.to_string(),
                correlation_id: context.correlation_id,
                user_id: context.user_id,
            },
        }
    }
}
