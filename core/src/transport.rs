//! Broker transport abstraction.
//!
//! The event bus talks to its broker exclusively through [`MessageTransport`],
//! which exposes the minimal topology and delivery surface the bus needs:
//! assert a topic exchange, assert and bind durable queues, publish, consume,
//! and acknowledge per delivery. Production uses an AMQP implementation;
//! tests use an in-memory one with the same routing semantics.
//!
//! Transport failures are transient by design. The publish path degrades to
//! the retry spool instead of failing the business operation, and consumers
//! reconnect; only topology assertion at startup is allowed to fail fast.

use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Errors from broker transport operations.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Failed to connect to the broker.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to assert an exchange or queue, or to bind a queue.
    #[error("topology assertion failed for '{name}': {reason}")]
    TopologyFailed {
        /// The exchange or queue involved.
        name: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to publish a message.
    #[error("publish failed for routing key '{routing_key}': {reason}")]
    PublishFailed {
        /// The routing key the message was published under.
        routing_key: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to start or continue consuming from a queue.
    #[error("consume failed for queue '{queue}': {reason}")]
    ConsumeFailed {
        /// The queue being consumed.
        queue: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to acknowledge or reject a delivery.
    #[error("acknowledgement failed: {0}")]
    AckFailed(String),

    /// The transport was closed and can no longer be used.
    #[error("transport closed")]
    Closed,
}

/// Settles a single delivery with the broker.
///
/// Every delivery must be settled exactly once: acked on success, rejected
/// with `requeue = true` for retryable failures, rejected with
/// `requeue = false` to discard poison messages. Both operations consume the
/// acknowledger so a second settlement cannot compile.
#[async_trait::async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledge successful processing.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AckFailed`] if the broker rejects the ack.
    async fn ack(self: Box<Self>) -> Result<(), TransportError>;

    /// Reject the delivery, optionally asking the broker to redeliver it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AckFailed`] if the broker rejects the
    /// settlement.
    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), TransportError>;
}

/// One message consumed from a queue.
pub struct Delivery {
    /// The routing key the message was published under.
    pub routing_key: String,
    /// The raw message payload.
    pub payload: Vec<u8>,
    /// Settlement handle for this delivery.
    pub ack: Box<dyn Acknowledger>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from one queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, TransportError>> + Send>>;

/// Broker operations the event bus depends on.
///
/// Implementations publish messages marked persistent and declare durable
/// topology, so queued messages survive a broker restart.
#[async_trait::async_trait]
pub trait MessageTransport: Send + Sync {
    /// Declare a topic exchange, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TopologyFailed`] if the declaration fails,
    /// including when an exchange of the same name exists with a different
    /// type.
    async fn assert_exchange(&self, exchange: &str, durable: bool) -> Result<(), TransportError>;

    /// Declare a queue, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TopologyFailed`] if the declaration fails.
    async fn assert_queue(&self, queue: &str, durable: bool) -> Result<(), TransportError>;

    /// Bind a queue to an exchange under a routing pattern.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TopologyFailed`] if the binding fails.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), TransportError>;

    /// Publish a persistent message to an exchange under a routing key.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PublishFailed`] if the broker refuses or
    /// the connection is down, and [`TransportError::Closed`] after
    /// [`close`](MessageTransport::close).
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Start consuming a queue, yielding deliveries until closed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConsumeFailed`] if the consumer cannot be
    /// registered.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError>;

    /// Close the transport. Idempotent; all later operations fail with
    /// [`TransportError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns the first error hit while shutting the connection down.
    async fn close(&self) -> Result<(), TransportError>;
}
