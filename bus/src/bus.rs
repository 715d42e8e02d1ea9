//! The event bus: durable topology, publish with spool fallback, and
//! subscription dispatch over per-queue consumer tasks.

use crate::consumer::{QueueConsumer, SharedSubscriptions, Subscription};
use crate::error::EventBusError;
use crate::handler::EventHandler;
use crate::topology::QueueSpec;
use questline_core::envelope::{EnvelopeCodec, EventContext};
use questline_core::environment::{Clock, SystemClock};
use questline_core::routing::normalize_routing_key;
use questline_core::spool::{SpoolStore, SpooledEvent};
use questline_core::transport::{MessageTransport, TransportError};
use questline_core::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Exchange name used when none is configured.
const DEFAULT_EXCHANGE: &str = "questline.events";

/// Default bound on a single broker publish.
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay before a consumer reconnects after a failure.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How long `close()` waits for each consumer task before aborting it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Mutable lifecycle state guarded by one lock.
struct Lifecycle {
    initialized: bool,
    closed: bool,
    consumers: Vec<tokio::task::JoinHandle<()>>,
}

/// Reliable event publishing and consumption on top of a [`MessageTransport`].
///
/// The bus owns the broker topology (one topic exchange, N durable queues
/// with routing-key bindings), wraps every outgoing payload in a versioned
/// envelope, and degrades to a durable spool when the broker is unreachable
/// so callers never fail on publish. Incoming deliveries are decoded once
/// and dispatched to every subscription whose pattern matches the routing
/// key; the delivery is acknowledged only after all of them succeed.
///
/// # Delivery guarantees
///
/// - **At-least-once**: spool replay and requeue-on-failure both allow
///   duplicates; handlers are expected to be idempotent.
/// - **Publish never blocks on a broken broker**: a failed or timed-out
///   publish lands in the spool and the call returns `Ok`.
///
/// # Lifecycle
///
/// `initialize()` must run before publishing or consuming. `close()` stops
/// consumers, then the transport, then the spool, and is idempotent.
///
/// # Example
///
/// ```rust,ignore
/// use questline_bus::{EventBus, QueueSpec};
///
/// let bus = EventBus::builder()
///     .transport(transport)
///     .spool(spool)
///     .source("progression-service")
///     .exchange("questline.events")
///     .queue(QueueSpec::new("progression", ["achievement.*", "quest.*"]))
///     .build()?;
///
/// bus.initialize().await?;
/// bus.publish("achievement.completed", serde_json::json!({"id": "a-1"})).await?;
/// ```
pub struct EventBus {
    /// Broker transport.
    transport: Arc<dyn MessageTransport>,

    /// Durable overflow for failed publishes.
    spool: Arc<dyn SpoolStore>,

    /// Clock for envelope timestamps.
    clock: Arc<dyn Clock>,

    /// Envelope builder stamped with this service's name.
    codec: EnvelopeCodec,

    /// Topic exchange all events flow through.
    exchange: String,

    /// Queues declared and consumed by this bus.
    queues: Vec<QueueSpec>,

    /// Bound on a single broker publish.
    publish_timeout: Duration,

    /// Consumer reconnect delay.
    retry_delay: Duration,

    /// Handler registry shared with consumer tasks.
    subscriptions: SharedSubscriptions,

    /// Shutdown signal for consumer tasks.
    shutdown: broadcast::Sender<()>,

    /// Lifecycle state.
    lifecycle: Mutex<Lifecycle>,
}

impl EventBus {
    /// Create a builder for configuring the bus.
    #[must_use]
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    /// The exchange this bus publishes to.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Declare the topology and start one consumer task per queue.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::AlreadyInitialized`] on a second call.
    /// - [`EventBusError::Closed`] after `close()`.
    /// - [`EventBusError::Transport`] if declaring the exchange, a queue,
    ///   or a binding fails. Topology failures are surfaced immediately so
    ///   a misconfigured deployment dies at startup, not at first publish.
    pub async fn initialize(&self) -> Result<(), EventBusError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.closed {
            return Err(EventBusError::Closed);
        }
        if lifecycle.initialized {
            return Err(EventBusError::AlreadyInitialized);
        }

        self.transport.assert_exchange(&self.exchange, true).await?;
        for queue in &self.queues {
            self.transport.assert_queue(&queue.name, true).await?;
            for pattern in &queue.bindings {
                self.transport
                    .bind_queue(&queue.name, &self.exchange, pattern)
                    .await?;
            }
        }

        for queue in &self.queues {
            let consumer = QueueConsumer::new(
                queue.name.clone(),
                Arc::clone(&self.transport),
                Arc::clone(&self.subscriptions),
                self.shutdown.subscribe(),
                self.retry_delay,
            );
            lifecycle.consumers.push(consumer.spawn());
        }

        lifecycle.initialized = true;
        info!(
            exchange = %self.exchange,
            queues = self.queues.len(),
            "event bus initialized"
        );
        Ok(())
    }

    /// Publish an event with no correlation context.
    ///
    /// See [`publish_with_context`](Self::publish_with_context).
    ///
    /// # Errors
    ///
    /// Same contract as [`publish_with_context`](Self::publish_with_context).
    pub async fn publish(
        &self,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<(), EventBusError> {
        self.publish_with_context(event_type, data, EventContext::default())
            .await
    }

    /// Seal `data` into an envelope and publish it under the normalized
    /// routing key.
    ///
    /// `event_type` accepts either the colon form (`"achievement:completed"`)
    /// or the dot form (`"achievement.completed"`); the envelope's type and
    /// the routing key both carry the dot form.
    ///
    /// A transport failure or timeout does not fail the caller: the payload
    /// is appended to the spool under the routing key for later replay and
    /// the call returns `Ok`.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::NotInitialized`] / [`EventBusError::Closed`] on
    ///   lifecycle misuse.
    /// - [`EventBusError::Codec`] if the envelope cannot be encoded.
    /// - [`EventBusError::Spool`] if the broker was unreachable and the
    ///   spool write failed too. Only then is the event lost.
    pub async fn publish_with_context(
        &self,
        event_type: &str,
        data: serde_json::Value,
        context: EventContext,
    ) -> Result<(), EventBusError> {
        self.ensure_ready().await?;

        let routing_key = normalize_routing_key(event_type);
        let timestamp = self.clock.now();
        let envelope = self.codec.seal(&routing_key, data, context, timestamp);
        let payload = envelope.to_bytes()?;

        let publish = self.transport.publish(&self.exchange, &routing_key, &payload);
        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => {
                metrics::counter!("event_bus.published", "routing_key" => routing_key.clone())
                    .increment(1);
                debug!(routing_key = %routing_key, "event published");
                Ok(())
            }
            Ok(Err(e)) => {
                self.spool_for_retry(&routing_key, envelope.data, timestamp, &e.to_string())
                    .await
            }
            Err(_) => {
                self.spool_for_retry(&routing_key, envelope.data, timestamp, "publish timed out")
                    .await
            }
        }
    }

    /// Register a handler for every delivery whose routing key matches
    /// `pattern`.
    ///
    /// Patterns are dot-delimited; `*` matches exactly one segment. An exact
    /// routing key is a valid pattern. Subscriptions take effect for the
    /// next delivery; there is no unsubscribe.
    pub async fn subscribe(&self, pattern: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let pattern = pattern.into();
        debug!(pattern = %pattern, "subscription registered");
        self.subscriptions
            .write()
            .await
            .push(Subscription { pattern, handler });
    }

    /// Re-publish spooled events, clearing each key only after its whole
    /// batch went out.
    ///
    /// Entries are replayed in spool order with their original timestamps.
    /// The first failing publish aborts the run and leaves the current
    /// key's batch intact, so already-replayed entries from that batch will
    /// be sent again on the next run. Consumers absorb the duplicates as
    /// ordinary at-least-once delivery.
    ///
    /// Returns the number of entries replayed and cleared.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::NotInitialized`] / [`EventBusError::Closed`] on
    ///   lifecycle misuse.
    /// - [`EventBusError::Transport`] for the first failed re-publish.
    /// - [`EventBusError::Spool`] if reading or clearing the spool fails.
    /// - [`EventBusError::Codec`] if a spooled payload cannot be re-sealed.
    pub async fn retry_failed_events(&self) -> Result<usize, EventBusError> {
        self.ensure_ready().await?;

        let keys = self.spool.list_keys().await?;
        let mut replayed = 0;

        for key in keys {
            let entries = self.spool.read_all(&key).await?;
            let count = entries.len();

            for entry in entries {
                let envelope =
                    self.codec
                        .seal(&key, entry.data, EventContext::default(), entry.timestamp);
                let payload = envelope.to_bytes()?;

                let publish = self.transport.publish(&self.exchange, &key, &payload);
                match tokio::time::timeout(self.publish_timeout, publish).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(
                            routing_key = %key,
                            error = %e,
                            "replay failed, keeping spooled batch"
                        );
                        return Err(e.into());
                    }
                    Err(_) => {
                        warn!(routing_key = %key, "replay timed out, keeping spooled batch");
                        return Err(TransportError::PublishFailed {
                            routing_key: key.clone(),
                            reason: "publish timed out".to_string(),
                        }
                        .into());
                    }
                }
            }

            // Clearing after the whole batch succeeded means a failure part
            // way through re-sends the batch next run rather than losing the
            // tail.
            self.spool.delete_key(&key).await?;

            if count > 0 {
                replayed += count;
                metrics::counter!("event_bus.replayed").increment(count as u64);
                info!(routing_key = %key, count, "replayed spooled events");
            }
        }

        Ok(replayed)
    }

    /// Stop consumers, then close the transport, then the spool.
    ///
    /// Every stage is attempted even when an earlier one fails; the first
    /// error is surfaced. A second `close()` is a no-op.
    ///
    /// # Errors
    ///
    /// The first failure from `transport.close()` or `spool.close()`.
    pub async fn close(&self) -> Result<(), EventBusError> {
        let consumers = {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.closed {
                return Ok(());
            }
            lifecycle.closed = true;
            std::mem::take(&mut lifecycle.consumers)
        };

        // Consumers stop first so in-flight deliveries settle before the
        // transport goes away underneath them.
        let _ = self.shutdown.send(());
        for handle in consumers {
            let abort = handle.abort_handle();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "consumer task failed during shutdown"),
                Err(_) => {
                    warn!("consumer task did not stop in time, aborting");
                    abort.abort();
                }
            }
        }

        let mut first_error: Option<EventBusError> = None;

        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "transport close failed");
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.spool.close().await {
            warn!(error = %e, "spool close failed");
            first_error.get_or_insert(e.into());
        }

        info!("event bus closed");
        first_error.map_or(Ok(()), Err)
    }

    /// Reject operations once closed or before `initialize()`.
    async fn ensure_ready(&self) -> Result<(), EventBusError> {
        let lifecycle = self.lifecycle.lock().await;
        if lifecycle.closed {
            return Err(EventBusError::Closed);
        }
        if !lifecycle.initialized {
            return Err(EventBusError::NotInitialized);
        }
        Ok(())
    }

    /// Durably park an event that could not reach the broker.
    async fn spool_for_retry(
        &self,
        routing_key: &str,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), EventBusError> {
        warn!(
            routing_key = %routing_key,
            reason = %reason,
            "publish failed, spooling event for replay"
        );
        self.spool
            .append(routing_key, SpooledEvent::new(data, timestamp))
            .await?;
        metrics::counter!("event_bus.spooled", "routing_key" => routing_key.to_string())
            .increment(1);
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for configuring an [`EventBus`].
///
/// Transport, spool, and source service name are required; everything else
/// has defaults.
#[derive(Default)]
pub struct EventBusBuilder {
    transport: Option<Arc<dyn MessageTransport>>,
    spool: Option<Arc<dyn SpoolStore>>,
    clock: Option<Arc<dyn Clock>>,
    source: Option<String>,
    exchange: Option<String>,
    queues: Vec<QueueSpec>,
    publish_timeout: Option<Duration>,
    retry_delay: Option<Duration>,
}

impl EventBusBuilder {
    /// Set the broker transport.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the durable spool for failed publishes.
    #[must_use]
    pub fn spool(mut self, spool: Arc<dyn SpoolStore>) -> Self {
        self.spool = Some(spool);
        self
    }

    /// Set the clock used for envelope timestamps.
    ///
    /// Defaults to the system clock; tests pin this.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the service name stamped into envelope metadata.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the topic exchange name.
    ///
    /// Default: `"questline.events"`.
    #[must_use]
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Add one queue to declare and consume.
    #[must_use]
    pub fn queue(mut self, queue: QueueSpec) -> Self {
        self.queues.push(queue);
        self
    }

    /// Add several queues to declare and consume.
    #[must_use]
    pub fn queues(mut self, queues: impl IntoIterator<Item = QueueSpec>) -> Self {
        self.queues.extend(queues);
        self
    }

    /// Bound a single broker publish.
    ///
    /// Default: 5 seconds. A publish exceeding this is treated as a
    /// transport failure and spooled.
    #[must_use]
    pub const fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = Some(timeout);
        self
    }

    /// Set the consumer reconnect delay.
    ///
    /// Default: 5 seconds.
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Build the bus.
    ///
    /// # Errors
    ///
    /// [`EventBusError::Misconfigured`] when transport, spool, or source is
    /// missing.
    pub fn build(self) -> Result<EventBus, EventBusError> {
        let transport = self
            .transport
            .ok_or_else(|| EventBusError::Misconfigured("transport is required".to_string()))?;
        let spool = self
            .spool
            .ok_or_else(|| EventBusError::Misconfigured("spool store is required".to_string()))?;
        let source = self.source.ok_or_else(|| {
            EventBusError::Misconfigured("source service name is required".to_string())
        })?;

        let (shutdown, _) = broadcast::channel(1);

        Ok(EventBus {
            transport,
            spool,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            codec: EnvelopeCodec::new(source),
            exchange: self.exchange.unwrap_or_else(|| DEFAULT_EXCHANGE.to_string()),
            queues: self.queues,
            publish_timeout: self.publish_timeout.unwrap_or(DEFAULT_PUBLISH_TIMEOUT),
            retry_delay: self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            shutdown,
            lifecycle: Mutex::new(Lifecycle {
                initialized: false,
                closed: false,
                consumers: Vec::new(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn event_bus_is_send_and_sync() {
        assert_send::<EventBus>();
        assert_sync::<EventBus>();
    }

    #[test]
    fn builder_rejects_missing_transport() {
        let result = EventBus::builder().source("svc").build();
        assert!(matches!(result, Err(EventBusError::Misconfigured(_))));
    }
}
