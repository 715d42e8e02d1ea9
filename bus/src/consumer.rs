//! Per-queue consumer tasks.
//!
//! Each queue declared on the bus gets one background task running a
//! consume-process-reconnect loop. The task decodes every delivery once,
//! fans it out to all matching subscriptions, and settles the delivery
//! according to the combined result:
//!
//! - every handler succeeded (or none matched): acknowledge
//! - any handler failed: reject with requeue for redelivery
//! - payload did not decode: reject without requeue
//!
//! Shutdown is coordinated through a broadcast channel owned by the bus.
//! A shutdown signal is only observed between deliveries, so an in-flight
//! delivery always settles before the task exits.

use crate::handler::EventHandler;
use futures::StreamExt;
use questline_core::envelope::EventEnvelope;
use questline_core::routing::pattern_matches;
use questline_core::transport::{Delivery, DeliveryStream, MessageTransport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

// ============================================================================
// Subscriptions
// ============================================================================

/// A registered handler and the routing pattern that selects events for it.
pub(crate) struct Subscription {
    pub(crate) pattern: String,
    pub(crate) handler: Arc<dyn EventHandler>,
}

/// Registry shared between the bus (which registers subscriptions) and the
/// consumer tasks (which match deliveries against them).
pub(crate) type SharedSubscriptions = Arc<RwLock<Vec<Subscription>>>;

// ============================================================================
// Consume Outcome
// ============================================================================

/// How a delivery was settled with the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Every matching handler succeeded, or no subscription matched.
    Acked,
    /// At least one handler failed; the delivery was returned for redelivery.
    Requeued,
    /// The payload did not decode; the delivery was dropped without requeue.
    Discarded,
}

impl ConsumeOutcome {
    /// String form for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Acked => "acked",
            Self::Requeued => "requeued",
            Self::Discarded => "discarded",
        }
    }
}

/// Why `process_stream` returned control to the outer loop.
enum StreamOutcome {
    /// Shutdown signal observed; stop the task.
    Shutdown,
    /// The delivery stream ended; reconnect after a delay.
    Ended,
}

// ============================================================================
// Queue Consumer
// ============================================================================

/// Background consumer for one queue.
///
/// Runs a consume-process-reconnect loop until shutdown is signalled or
/// the transport reports itself closed.
pub(crate) struct QueueConsumer {
    /// Queue name (for logging and metric labels).
    queue: String,

    /// Transport to consume deliveries from.
    transport: Arc<dyn MessageTransport>,

    /// Subscription registry shared with the bus.
    subscriptions: SharedSubscriptions,

    /// Shutdown signal receiver.
    shutdown: broadcast::Receiver<()>,

    /// Delay before reconnecting after a failure or stream end.
    retry_delay: Duration,
}

impl QueueConsumer {
    pub(crate) fn new(
        queue: impl Into<String>,
        transport: Arc<dyn MessageTransport>,
        subscriptions: SharedSubscriptions,
        shutdown: broadcast::Receiver<()>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            queue: queue.into(),
            transport,
            subscriptions,
            shutdown,
            retry_delay,
        }
    }

    /// Spawn the consumer as a background task.
    pub(crate) fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Main loop: consume from the queue, process deliveries, reconnect on
    /// stream end, stop on shutdown or transport close.
    async fn run(&mut self) {
        info!(queue = %self.queue, "queue consumer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(queue = %self.queue, "queue consumer received shutdown signal");
                    break;
                }
                consume_result = self.transport.consume(&self.queue) => {
                    match consume_result {
                        Ok(mut stream) => {
                            debug!(queue = %self.queue, "consuming from queue");

                            match self.process_stream(&mut stream).await {
                                StreamOutcome::Shutdown => break,
                                StreamOutcome::Ended => {
                                    warn!(
                                        queue = %self.queue,
                                        "delivery stream ended, reconnecting in {:?}",
                                        self.retry_delay
                                    );
                                    tokio::time::sleep(self.retry_delay).await;
                                }
                            }
                        }
                        Err(TransportError::Closed) => {
                            info!(queue = %self.queue, "transport closed, stopping consumer");
                            break;
                        }
                        Err(e) => {
                            error!(
                                queue = %self.queue,
                                error = %e,
                                "failed to consume from queue, retrying in {:?}",
                                self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }

        info!(queue = %self.queue, "queue consumer stopped");
    }

    /// Process deliveries until the stream ends or shutdown is signalled.
    async fn process_stream(&mut self, stream: &mut DeliveryStream) -> StreamOutcome {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(queue = %self.queue, "shutdown signal received during processing");
                    return StreamOutcome::Shutdown;
                }
                delivery = stream.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            let routing_key = delivery.routing_key.clone();
                            let outcome = self.settle(delivery).await;
                            self.record(&routing_key, outcome);
                        }
                        Some(Err(TransportError::Closed)) => {
                            return StreamOutcome::Ended;
                        }
                        Some(Err(e)) => {
                            error!(queue = %self.queue, error = %e, "error receiving delivery");
                        }
                        None => {
                            warn!(queue = %self.queue, "delivery stream ended");
                            return StreamOutcome::Ended;
                        }
                    }
                }
            }
        }
    }

    /// Decode a delivery, run every matching handler, and settle with the
    /// broker based on the combined result.
    async fn settle(&self, delivery: Delivery) -> ConsumeOutcome {
        let Delivery {
            routing_key,
            payload,
            ack,
        } = delivery;

        let envelope = match EventEnvelope::from_bytes(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    queue = %self.queue,
                    routing_key = %routing_key,
                    error = %e,
                    "discarding malformed delivery"
                );
                if let Err(e) = ack.reject(false).await {
                    error!(queue = %self.queue, error = %e, "failed to reject delivery");
                }
                return ConsumeOutcome::Discarded;
            }
        };

        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .iter()
                .filter(|s| pattern_matches(&s.pattern, &routing_key))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        // A queue can legitimately hold traffic no local subscription wants,
        // for example after a handler is retired while its binding remains.
        if handlers.is_empty() {
            debug!(
                queue = %self.queue,
                routing_key = %routing_key,
                "no subscription matched, acknowledging"
            );
            if let Err(e) = ack.ack().await {
                error!(queue = %self.queue, error = %e, "failed to acknowledge delivery");
            }
            return ConsumeOutcome::Acked;
        }

        // All matching handlers run concurrently and all settle before the
        // delivery is acknowledged or requeued.
        let results =
            futures::future::join_all(handlers.iter().map(|handler| handler.handle(&envelope)))
                .await;

        let mut failed = false;
        for e in results.into_iter().filter_map(Result::err) {
            failed = true;
            error!(
                queue = %self.queue,
                routing_key = %routing_key,
                event_type = %envelope.event_type,
                error = %e,
                "handler failed"
            );
        }

        if failed {
            if let Err(e) = ack.reject(true).await {
                error!(queue = %self.queue, error = %e, "failed to requeue delivery");
            }
            ConsumeOutcome::Requeued
        } else {
            if let Err(e) = ack.ack().await {
                error!(queue = %self.queue, error = %e, "failed to acknowledge delivery");
            }
            ConsumeOutcome::Acked
        }
    }

    /// Record the settlement in metrics and the trace log.
    fn record(&self, routing_key: &str, outcome: ConsumeOutcome) {
        match outcome {
            ConsumeOutcome::Acked => {
                metrics::counter!("event_bus.acked", "queue" => self.queue.clone()).increment(1);
            }
            ConsumeOutcome::Requeued => {
                metrics::counter!("event_bus.requeued", "queue" => self.queue.clone()).increment(1);
            }
            ConsumeOutcome::Discarded => {
                metrics::counter!("event_bus.discarded", "queue" => self.queue.clone()).increment(1);
            }
        }

        debug!(
            queue = %self.queue,
            routing_key = %routing_key,
            outcome = outcome.as_str(),
            "delivery settled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_as_str_covers_all_variants() {
        assert_eq!(ConsumeOutcome::Acked.as_str(), "acked");
        assert_eq!(ConsumeOutcome::Requeued.as_str(), "requeued");
        assert_eq!(ConsumeOutcome::Discarded.as_str(), "discarded");
    }
}
