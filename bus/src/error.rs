//! Error types for the event bus.

use questline_core::envelope::CodecError;
use questline_core::spool::SpoolError;
use questline_core::transport::TransportError;
use thiserror::Error;

/// Errors surfaced by [`EventBus`](crate::EventBus) operations.
///
/// Transport failures during `publish` are deliberately absent from the
/// publish path: the bus degrades to the spool instead of failing the
/// caller. A publish only errors when the event cannot be encoded or the
/// spool itself rejects the entry.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The bus was constructed with an invalid or incomplete configuration.
    #[error("event bus misconfigured: {0}")]
    Misconfigured(String),

    /// An operation requiring broker topology ran before `initialize()`.
    #[error("event bus not initialized")]
    NotInitialized,

    /// `initialize()` was called a second time.
    #[error("event bus already initialized")]
    AlreadyInitialized,

    /// The bus has been closed; no further operations are accepted.
    #[error("event bus closed")]
    Closed,

    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An envelope could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The durable spool failed.
    #[error(transparent)]
    Spool(#[from] SpoolError),
}
