//! Reliable event delivery on top of a message transport.
//!
//! This crate hosts the [`EventBus`]: broker topology declaration, envelope
//! publishing with a durable spool fallback, wildcard subscription dispatch
//! over per-queue consumer tasks, spool replay, and an explicit
//! initialize/close lifecycle.
//!
//! # Modules
//!
//! - [`bus`]: The [`EventBus`] and its builder
//! - [`consumer`]: Per-queue consumer tasks and the [`ConsumeOutcome`] state machine
//! - [`error`]: [`EventBusError`]
//! - [`handler`]: The [`EventHandler`] subscription trait
//! - [`topology`]: [`QueueSpec`] queue/binding declarations
//!
//! # Reliability model
//!
//! Publishing is never allowed to fail on a broken broker: a publish that
//! errors or times out parks the payload in a durable spool keyed by routing
//! key, and `retry_failed_events()` replays spooled batches once the broker
//! is back. Consumption is at-least-once: a delivery is acknowledged only
//! when every matching handler succeeds, requeued when any fails, and
//! dropped only when the payload does not decode at all.

pub mod bus;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod topology;

pub use bus::{EventBus, EventBusBuilder};
pub use consumer::ConsumeOutcome;
pub use error::EventBusError;
pub use handler::{EventHandler, HandlerError};
pub use topology::QueueSpec;
