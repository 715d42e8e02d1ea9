//! # Questline AMQP
//!
//! Broker transport for the event bus: [`AmqpTransport`] implements
//! [`MessageTransport`](questline_core::transport::MessageTransport) over
//! [`lapin`], with durable topic exchanges and queues, persistent publishes
//! confirmed by the broker, and per-delivery acknowledgement.

pub mod transport;

pub use transport::{AmqpTransport, AmqpTransportBuilder};
