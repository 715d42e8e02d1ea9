//! In-memory broker with real topic-routing semantics.
//!
//! [`InMemoryTransport`] implements the whole transport contract: topology
//! assertion, pattern-based routing into queues, per-delivery ack/reject
//! with requeue-as-redelivery, and scripted publish failures. Tests can read
//! back everything that happened through [`published`](InMemoryTransport::published)
//! and [`settlements`](InMemoryTransport::settlements).

use questline_core::routing::pattern_matches;
use questline_core::transport::{
    Acknowledger, Delivery, DeliveryStream, MessageTransport, TransportError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// A message accepted by the fake broker, for assertions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Exchange the message was published to.
    pub exchange: String,
    /// Routing key it was published under.
    pub routing_key: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

/// A recorded delivery settlement, for assertions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// The delivery was acknowledged.
    Acked {
        /// Queue it was consumed from.
        queue: String,
        /// Routing key it was published under.
        routing_key: String,
    },
    /// The delivery was rejected.
    Rejected {
        /// Queue it was consumed from.
        queue: String,
        /// Routing key it was published under.
        routing_key: String,
        /// Whether redelivery was requested.
        requeue: bool,
    },
}

#[derive(Clone, Debug)]
struct QueuedMessage {
    routing_key: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct QueueState {
    consumer: Option<mpsc::UnboundedSender<QueuedMessage>>,
    backlog: VecDeque<QueuedMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Binding {
    queue: String,
    exchange: String,
    pattern: String,
}

#[derive(Default)]
struct BrokerState {
    exchanges: Vec<String>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    published: Vec<PublishedMessage>,
    settlements: Vec<Settlement>,
    publish_script: VecDeque<bool>,
    publishes_failing: bool,
    closed: bool,
}

fn deliver(state: &mut BrokerState, queue_name: &str, message: QueuedMessage) {
    let Some(queue) = state.queues.get_mut(queue_name) else {
        return;
    };
    if let Some(consumer) = &queue.consumer {
        if consumer.send(message.clone()).is_ok() {
            return;
        }
        // Consumer went away; fall back to the backlog.
        queue.consumer = None;
    }
    queue.backlog.push_back(message);
}

/// In-memory [`MessageTransport`].
///
/// Routing mirrors a topic exchange: a published message lands once in
/// every queue that has at least one matching binding. Rejecting a delivery
/// with `requeue = true` puts it back on the same queue.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryTransport {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::ConnectionFailed("broker state lock poisoned".to_string()))
    }

    /// Every message the broker accepted, in publish order.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().published.clone()
    }

    /// Every delivery settlement, in settlement order.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn settlements(&self) -> Vec<Settlement> {
        self.state.lock().unwrap().settlements.clone()
    }

    /// Names of the declared exchanges.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn declared_exchanges(&self) -> Vec<String> {
        self.state.lock().unwrap().exchanges.clone()
    }

    /// Names of the declared queues.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn declared_queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self.state.lock().unwrap().queues.keys().cloned().collect();
        queues.sort();
        queues
    }

    /// Whether a queue is bound to an exchange under a pattern.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn has_binding(&self, queue: &str, exchange: &str, pattern: &str) -> bool {
        self.state.lock().unwrap().bindings.contains(&Binding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            pattern: pattern.to_string(),
        })
    }

    /// While set, every publish fails as if the broker were down.
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn set_publishes_failing(&self, failing: bool) {
        self.state.lock().unwrap().publishes_failing = failing;
    }

    /// Script the outcome of the next publishes: `true` succeeds, `false`
    /// fails. Once the script runs out, the persistent failing flag applies
    /// again.
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn plan_publish_outcomes(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.state
            .lock()
            .unwrap()
            .publish_script
            .extend(outcomes);
    }

    /// Whether [`close`](MessageTransport::close) was called.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

struct InMemoryAcknowledger {
    queue: String,
    message: QueuedMessage,
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryAcknowledger {
    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::AckFailed("broker state lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl Acknowledger for InMemoryAcknowledger {
    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        state.settlements.push(Settlement::Acked {
            queue: self.queue.clone(),
            routing_key: self.message.routing_key.clone(),
        });
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        state.settlements.push(Settlement::Rejected {
            queue: self.queue.clone(),
            routing_key: self.message.routing_key.clone(),
            requeue,
        });
        if requeue {
            deliver(&mut state, &self.queue, self.message.clone());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MessageTransport for InMemoryTransport {
    async fn assert_exchange(&self, exchange: &str, _durable: bool) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(TransportError::Closed);
        }
        if !state.exchanges.iter().any(|e| e == exchange) {
            state.exchanges.push(exchange.to_string());
        }
        Ok(())
    }

    async fn assert_queue(&self, queue: &str, _durable: bool) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(TransportError::Closed);
        }
        if !state.queues.contains_key(queue) {
            return Err(TransportError::TopologyFailed {
                name: queue.to_string(),
                reason: "queue not declared".to_string(),
            });
        }
        if !state.exchanges.iter().any(|e| e == exchange) {
            return Err(TransportError::TopologyFailed {
                name: exchange.to_string(),
                reason: "exchange not declared".to_string(),
            });
        }
        let binding = Binding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            pattern: pattern.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(TransportError::Closed);
        }

        let scripted = state.publish_script.pop_front();
        let succeed = scripted.unwrap_or(!state.publishes_failing);
        if !succeed {
            return Err(TransportError::PublishFailed {
                routing_key: routing_key.to_string(),
                reason: "simulated broker failure".to_string(),
            });
        }

        if !state.exchanges.iter().any(|e| e == exchange) {
            return Err(TransportError::PublishFailed {
                routing_key: routing_key.to_string(),
                reason: format!("unknown exchange '{exchange}'"),
            });
        }

        state.published.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
        });

        // One copy per queue, no matter how many of its bindings match.
        let mut matched: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && pattern_matches(&b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect();
        matched.sort();
        matched.dedup();

        for queue in matched {
            deliver(
                &mut state,
                &queue,
                QueuedMessage {
                    routing_key: routing_key.to_string(),
                    payload: payload.to_vec(),
                },
            );
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError> {
        let receiver = {
            let mut state = self.lock()?;
            if state.closed {
                return Err(TransportError::Closed);
            }
            let Some(queue_state) = state.queues.get_mut(queue) else {
                return Err(TransportError::ConsumeFailed {
                    queue: queue.to_string(),
                    reason: "queue not declared".to_string(),
                });
            };

            let (sender, receiver) = mpsc::unbounded_channel();
            while let Some(message) = queue_state.backlog.pop_front() {
                // Receiver is alive in this scope, the send cannot fail.
                let _ = sender.send(message);
            }
            queue_state.consumer = Some(sender);
            receiver
        };

        let queue = queue.to_string();
        let state = Arc::clone(&self.state);
        let stream = async_stream::stream! {
            let mut receiver = receiver;
            while let Some(message) = receiver.recv().await {
                let ack = Box::new(InMemoryAcknowledger {
                    queue: queue.clone(),
                    message: message.clone(),
                    state: Arc::clone(&state),
                });
                yield Ok(Delivery {
                    routing_key: message.routing_key,
                    payload: message.payload,
                    ack,
                });
            }
        };
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        state.closed = true;
        // Dropping the senders ends every delivery stream.
        for queue in state.queues.values_mut() {
            queue.consumer = None;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn topology(transport: &InMemoryTransport) {
        transport.assert_exchange("events", true).await.unwrap();
        transport.assert_queue("quest-queue", true).await.unwrap();
        transport
            .bind_queue("quest-queue", "events", "quest.*")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn routes_by_binding_pattern() {
        let transport = InMemoryTransport::new();
        topology(&transport).await;

        transport
            .publish("events", "quest.started", b"a")
            .await
            .unwrap();
        transport
            .publish("events", "achievement.completed", b"b")
            .await
            .unwrap();

        let mut stream = transport.consume("quest-queue").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.routing_key, "quest.started");
        assert_eq!(delivery.payload, b"a");
        delivery.ack.ack().await.unwrap();

        assert_eq!(transport.published().len(), 2);
        assert_eq!(
            transport.settlements(),
            vec![Settlement::Acked {
                queue: "quest-queue".to_string(),
                routing_key: "quest.started".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn requeue_redelivers_to_the_same_queue() {
        let transport = InMemoryTransport::new();
        topology(&transport).await;

        transport
            .publish("events", "quest.completed", b"x")
            .await
            .unwrap();

        let mut stream = transport.consume("quest-queue").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        first.ack.reject(true).await.unwrap();

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.routing_key, "quest.completed");
        second.ack.reject(false).await.unwrap();

        assert_eq!(
            transport.settlements(),
            vec![
                Settlement::Rejected {
                    queue: "quest-queue".to_string(),
                    routing_key: "quest.completed".to_string(),
                    requeue: true,
                },
                Settlement::Rejected {
                    queue: "quest-queue".to_string(),
                    routing_key: "quest.completed".to_string(),
                    requeue: false,
                },
            ]
        );
    }

    #[tokio::test]
    async fn scripted_and_persistent_failures() {
        let transport = InMemoryTransport::new();
        topology(&transport).await;

        transport.plan_publish_outcomes([true, false]);
        transport.publish("events", "quest.started", b"1").await.unwrap();
        let err = transport
            .publish("events", "quest.started", b"2")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::PublishFailed { .. }));

        transport.set_publishes_failing(true);
        assert!(transport.publish("events", "quest.started", b"3").await.is_err());
        transport.set_publishes_failing(false);
        transport.publish("events", "quest.started", b"4").await.unwrap();

        assert_eq!(transport.published().len(), 2);
    }

    #[tokio::test]
    async fn close_rejects_further_use() {
        let transport = InMemoryTransport::new();
        topology(&transport).await;
        transport.close().await.unwrap();

        assert!(transport.is_closed());
        assert!(matches!(
            transport.publish("events", "quest.started", b"x").await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.consume("quest-queue").await.err(),
            Some(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn binding_requires_declared_topology() {
        let transport = InMemoryTransport::new();
        transport.assert_exchange("events", true).await.unwrap();

        let err = transport
            .bind_queue("missing", "events", "quest.*")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::TopologyFailed { .. }));
    }
}
