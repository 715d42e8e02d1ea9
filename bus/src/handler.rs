//! Event handler trait for subscribers.
//!
//! The bus decodes each delivery into an [`EventEnvelope`] once and hands
//! the same envelope to every handler whose subscription pattern matches
//! the delivery's routing key. Handlers contain the application logic;
//! acknowledgement is decided by the bus from their combined results.

use async_trait::async_trait;
use questline_core::envelope::EventEnvelope;

/// Boxed error type returned by handlers.
///
/// Handlers are free to bubble up any error; the bus only cares whether
/// processing succeeded. A failed handler causes the delivery to be
/// requeued for another attempt.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes decoded events delivered to a queue.
///
/// Implementors must be `Send + Sync + 'static` because handlers are shared
/// across consumer tasks.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use questline_bus::{EventHandler, HandlerError};
/// use questline_core::envelope::EventEnvelope;
///
/// struct AuditHandler;
///
/// #[async_trait]
/// impl EventHandler for AuditHandler {
///     async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
///         tracing::info!(event_type = %envelope.event_type, "audited");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one decoded event.
    ///
    /// # Errors
    ///
    /// Return an error to signal that processing failed and the delivery
    /// should be requeued. Returning `Ok(())` contributes to a positive
    /// acknowledgement once every matching handler has succeeded.
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}
