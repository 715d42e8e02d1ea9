//! # Questline Postgres
//!
//! PostgreSQL persistence for the Questline progression system:
//!
//! - [`PostgresAchievementStore`] / [`PostgresQuestStore`]: the
//!   `questline-core` progress stores, with revision-checked upserts so
//!   concurrent writers race on a column instead of a lock.
//! - [`PostgresAchievementCatalog`] / [`PostgresQuestCatalog`]: definition
//!   lookups, plus `upsert_definition` for seeding.
//! - [`PostgresUserDirectory`]: additive reward balances, the default
//!   `UserDirectory` when no external identity service is wired in.
//! - [`run_migrations`]: embedded schema migrations, applied at startup.
//!
//! All constructors take an existing [`sqlx::PgPool`]; pool sizing and
//! connection URLs are the service's concern.

pub mod catalog;
pub mod directory;
pub mod migrate;
pub mod store;

pub use catalog::{PostgresAchievementCatalog, PostgresQuestCatalog};
pub use directory::PostgresUserDirectory;
pub use migrate::run_migrations;
pub use store::{PostgresAchievementStore, PostgresQuestStore};
