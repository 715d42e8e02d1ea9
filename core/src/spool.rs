//! Durable overflow for events that could not be published.
//!
//! When the broker is unreachable or slow, the bus appends the event payload
//! here instead of failing the caller, keyed by routing key. A later
//! [`retry_failed_events`](../../questline_bus/struct.EventBus.html#method.retry_failed_events)
//! pass re-publishes each key's batch in order and deletes the key only after
//! the whole batch went through. A partial failure leaves the batch in
//! place, so entries that already went out may be delivered a second time;
//! consumers are idempotent to absorb that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from spool storage operations.
#[derive(Error, Debug, Clone)]
pub enum SpoolError {
    /// The underlying store failed.
    #[error("spool storage error: {0}")]
    Storage(String),

    /// An entry could not be encoded or decoded.
    #[error("spool serialization error: {0}")]
    Serialization(String),
}

/// One event payload parked for later re-publish.
///
/// The routing key is the spool key, not part of the entry. The timestamp
/// is the original production time; replay stamps it back into the envelope
/// so consumers see when the event actually happened, not when the broker
/// recovered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpooledEvent {
    /// The event payload as it would have been published.
    pub data: serde_json::Value,
    /// Original production time.
    pub timestamp: DateTime<Utc>,
}

impl SpooledEvent {
    /// A spool entry for a payload produced at the given time.
    #[must_use]
    pub const fn new(data: serde_json::Value, timestamp: DateTime<Utc>) -> Self {
        Self { data, timestamp }
    }
}

/// Ordered, per-routing-key durable storage for failed publishes.
///
/// Implementations keep entries in append order per key and own their key
/// namespacing; the routing keys passed in and listed out are plain.
#[async_trait::async_trait]
pub trait SpoolStore: Send + Sync {
    /// Append an entry to a key's batch.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Storage`] if the write fails.
    async fn append(&self, routing_key: &str, entry: SpooledEvent) -> Result<(), SpoolError>;

    /// Read a key's whole batch in append order. Missing keys read as empty.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Storage`] if the read fails, or
    /// [`SpoolError::Serialization`] for entries that no longer decode.
    async fn read_all(&self, routing_key: &str) -> Result<Vec<SpooledEvent>, SpoolError>;

    /// Delete a key and its whole batch. Deleting a missing key is fine.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Storage`] if the delete fails.
    async fn delete_key(&self, routing_key: &str) -> Result<(), SpoolError>;

    /// List every routing key that currently has spooled entries.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Storage`] if the listing fails.
    async fn list_keys(&self) -> Result<Vec<String>, SpoolError>;

    /// Close the store. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SpoolError::Storage`] if shutdown fails.
    async fn close(&self) -> Result<(), SpoolError>;
}
