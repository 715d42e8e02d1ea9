//! AMQP transport on [`lapin`].
//!
//! One connection carries everything. Topology assertions and publishes share
//! a channel opened in confirm mode, so a successful publish means the broker
//! owns the message. Each consumer gets its own channel, which scopes the
//! prefetch window per consumer and keeps a consumer failure away from the
//! publish path.
//!
//! Messages are published with delivery mode 2 (persistent); together with
//! durable exchanges and queues, queued messages survive a broker restart.

use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use questline_core::transport::{
    Acknowledger, Delivery, DeliveryStream, MessageTransport, TransportError,
};
use std::sync::atomic::{AtomicBool, Ordering};

/// AMQP delivery mode for messages that must survive a broker restart.
const PERSISTENT: u8 = 2;

/// AMQP reply code for a clean close.
const REPLY_SUCCESS: u16 = 200;

const DEFAULT_PREFETCH: u16 = 16;
const DEFAULT_CONNECTION_NAME: &str = "questline";

/// Builder for [`AmqpTransport`].
#[derive(Debug, Clone)]
pub struct AmqpTransportBuilder {
    url: String,
    prefetch: u16,
    connection_name: String,
}

impl AmqpTransportBuilder {
    fn new(url: String) -> Self {
        Self {
            url,
            prefetch: DEFAULT_PREFETCH,
            connection_name: DEFAULT_CONNECTION_NAME.to_string(),
        }
    }

    /// Per-consumer prefetch window, the broker-side cap on unacked
    /// deliveries in flight.
    #[must_use]
    pub const fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Connection name shown in broker management tools.
    #[must_use]
    pub fn connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    /// Open the connection and the publish channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if the broker is
    /// unreachable, refuses the handshake, or the publish channel cannot
    /// be opened in confirm mode.
    pub async fn connect(self) -> Result<AmqpTransport, TransportError> {
        let properties = ConnectionProperties::default()
            .with_connection_name(self.connection_name.clone().into());
        let connection = Connection::connect(&self.url, properties)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let channel = connection.create_channel().await.map_err(|e| {
            TransportError::ConnectionFailed(format!("failed to open a channel: {e}"))
        })?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| {
                TransportError::ConnectionFailed(format!(
                    "failed to enable publisher confirms: {e}"
                ))
            })?;

        tracing::info!(
            connection_name = %self.connection_name,
            prefetch = self.prefetch,
            "amqp transport connected"
        );

        Ok(AmqpTransport {
            connection,
            channel,
            prefetch: self.prefetch,
            closed: AtomicBool::new(false),
        })
    }
}

/// [`MessageTransport`] backed by an AMQP broker.
///
/// Cheap to share behind an [`Arc`](std::sync::Arc); every operation takes
/// `&self`. [`close`](MessageTransport::close) is terminal: the connection is
/// torn down and later calls fail with [`TransportError::Closed`].
pub struct AmqpTransport {
    connection: Connection,
    channel: Channel,
    prefetch: u16,
    closed: AtomicBool,
}

impl AmqpTransport {
    /// Connect with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if the broker is
    /// unreachable or refuses the handshake.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        Self::builder(url).connect().await
    }

    /// Start configuring a transport for the broker at `url`.
    #[must_use]
    pub fn builder(url: impl Into<String>) -> AmqpTransportBuilder {
        AmqpTransportBuilder::new(url.into())
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

/// Settles one delivery through the consumer channel it arrived on.
struct LapinAcknowledger {
    acker: Acker,
}

#[async_trait::async_trait]
impl Acknowledger for LapinAcknowledger {
    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| TransportError::AckFailed(e.to_string()))
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<(), TransportError> {
        self.acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(|e| TransportError::AckFailed(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MessageTransport for AmqpTransport {
    async fn assert_exchange(&self, exchange: &str, durable: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::TopologyFailed {
                name: exchange.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(exchange, durable, "topic exchange asserted");
        Ok(())
    }

    async fn assert_queue(&self, queue: &str, durable: bool) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::TopologyFailed {
                name: queue.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(queue, durable, "queue asserted");
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.channel
            .queue_bind(
                queue,
                exchange,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::TopologyFailed {
                name: queue.to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(queue, exchange, pattern, "queue bound");
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(PERSISTENT),
            )
            .await
            .map_err(|e| TransportError::PublishFailed {
                routing_key: routing_key.to_string(),
                reason: e.to_string(),
            })?;

        // Confirm mode is on, so this resolves once the broker owns the message.
        let confirmation = confirm.await.map_err(|e| TransportError::PublishFailed {
            routing_key: routing_key.to_string(),
            reason: e.to_string(),
        })?;
        if let Confirmation::Nack(_) = confirmation {
            tracing::error!(exchange, routing_key, "broker nacked publish");
            return Err(TransportError::PublishFailed {
                routing_key: routing_key.to_string(),
                reason: "broker negatively acknowledged the publish".to_string(),
            });
        }

        tracing::debug!(
            exchange,
            routing_key,
            payload_len = payload.len(),
            "message published"
        );
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, TransportError> {
        self.ensure_open()?;
        let channel =
            self.connection
                .create_channel()
                .await
                .map_err(|e| TransportError::ConsumeFailed {
                    queue: queue.to_string(),
                    reason: e.to_string(),
                })?;
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| TransportError::ConsumeFailed {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        let mut consumer = channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::ConsumeFailed {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(queue, prefetch = self.prefetch, "consumer started");

        let queue = queue.to_string();
        let deliveries = async_stream::stream! {
            // The channel closes on drop, so it must live as long as the
            // consumer; unacked deliveries requeue when the stream is dropped.
            let _channel = channel;
            while let Some(result) = consumer.next().await {
                match result {
                    Ok(delivery) => {
                        let routing_key = delivery.routing_key.as_str().to_string();
                        yield Ok(Delivery {
                            routing_key,
                            payload: delivery.data,
                            ack: Box::new(LapinAcknowledger {
                                acker: delivery.acker,
                            }),
                        });
                    }
                    Err(e) => {
                        yield Err(TransportError::ConsumeFailed {
                            queue: queue.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        };
        Ok(Box::pin(deliveries))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "shutting down")
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        tracing::info!("amqp transport closed");
        Ok(())
    }
}
