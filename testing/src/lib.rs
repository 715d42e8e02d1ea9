//! # Questline Testing
//!
//! In-memory implementations of every Questline collaborator trait, for
//! fast deterministic tests:
//!
//! - [`InMemoryTransport`]: a fake broker with real topic-pattern routing,
//!   requeue-as-redelivery, scripted publish failures, and a settlement log.
//! - [`InMemorySpool`]: the retry spool, with a failure toggle.
//! - [`InMemoryProgressStore`]: revision-checked upserts matching the
//!   Postgres store's concurrency behavior.
//! - [`InMemoryAchievementCatalog`] / [`InMemoryQuestCatalog`]: seeded
//!   definition lookups.
//! - [`RecordingUserDirectory`]: records every grant so reward idempotence
//!   is a plain assertion.
//! - [`FixedClock`] / [`test_clock`]: deterministic, movable time.
//!
//! ## Example
//!
//! ```ignore
//! use questline_testing::{test_clock, InMemoryTransport};
//!
//! #[tokio::test]
//! async fn publishes_through_the_fake_broker() {
//!     let transport = InMemoryTransport::new();
//!     transport.assert_exchange("questline.events", true).await?;
//!     // ... build the bus on top and assert on transport.published()
//! }
//! ```

pub mod clock;
pub mod spool;
pub mod stores;
pub mod transport;

pub use clock::{FixedClock, test_clock};
pub use spool::InMemorySpool;
pub use stores::{
    Grant, InMemoryAchievementCatalog, InMemoryProgressStore, InMemoryQuestCatalog,
    RecordingUserDirectory,
};
pub use transport::{InMemoryTransport, PublishedMessage, Settlement};
