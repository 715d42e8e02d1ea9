//! # Questline Core
//!
//! Domain model and collaborator traits for the Questline progression
//! system.
//!
//! This crate holds everything the rest of the workspace agrees on:
//!
//! - **Progress records** ([`progress`]): achievement and quest progress as
//!   plain data, advanced by pure transition functions with clamped values,
//!   a forward-only status machine, and one-shot completion detection.
//! - **Targets** ([`target`]): achievement and quest definitions with their
//!   rewards, plus the id newtypes.
//! - **Wire envelope** ([`envelope`]): the JSON event envelope shared with
//!   other services, and its codec.
//! - **Routing** ([`routing`]): dot-delimited routing keys and `*`-wildcard
//!   binding patterns.
//! - **Collaborator traits** ([`transport`], [`spool`], [`store`],
//!   [`environment`]): the seams behind which the broker, the retry spool,
//!   the database, the identity service, and the clock live.
//!
//! The crate is infrastructure-free: no network, no database, no broker.
//! Implementations live in `questline-amqp`, `questline-redis`,
//! `questline-postgres`, and `questline-testing`; the machinery that drives
//! them lives in `questline-bus` and `questline-tracker`.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod envelope;
pub mod environment;
pub mod events;
pub mod progress;
pub mod routing;
pub mod spool;
pub mod store;
pub mod target;
pub mod transport;

pub use envelope::{
    CodecError, EnvelopeCodec, EventContext, EventEnvelope, EventMetadata, WIRE_VERSION,
};
pub use environment::{Clock, SystemClock};
pub use progress::{
    AchievementProgress, Applied, ObjectiveOutOfRange, ObjectiveProgress, ProgressChange,
    ProgressRecord, ProgressStatus, QuestProgress,
};
pub use routing::{normalize_routing_key, pattern_matches};
pub use spool::{SpoolError, SpoolStore, SpooledEvent};
pub use store::{
    AchievementCatalog, GrantError, ProgressStore, QuestCatalog, StoreError, UserDirectory,
};
pub use target::{Achievement, AchievementId, Objective, Quest, QuestId, Reward, UserId};
pub use transport::{Acknowledger, Delivery, DeliveryStream, MessageTransport, TransportError};
