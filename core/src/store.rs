//! Storage and user-service collaborator traits.
//!
//! Progress records persist through [`ProgressStore`], target definitions
//! are read through the catalogs, and reward grants go through
//! [`UserDirectory`]. All three are trait seams: production wires Postgres
//! and the identity service behind them, tests wire in-memory fakes.

use crate::progress::{ProgressRecord, ProgressStatus};
use crate::target::{Achievement, AchievementId, Quest, QuestId, UserId};
use thiserror::Error;

/// Errors from progress and catalog storage.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// A record already exists where a fresh insert was required.
    #[error("record already exists for user '{user_id}' and target '{target_id}'")]
    Duplicate {
        /// The user the record belongs to.
        user_id: String,
        /// The target the record tracks.
        target_id: String,
    },

    /// The record's revision no longer matches the stored one.
    ///
    /// Another writer got there first; re-read and re-apply.
    #[error("revision conflict: expected {expected}, found {actual}")]
    RevisionConflict {
        /// The revision the writer read.
        expected: u64,
        /// The revision actually stored.
        actual: u64,
    },

    /// The underlying database failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether re-reading and re-applying the whole read-modify-write cycle
    /// can succeed.
    ///
    /// Revision conflicts and duplicate-insert races resolve on a re-read;
    /// everything else needs intervention.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RevisionConflict { .. } | Self::Duplicate { .. })
    }
}

/// Persistence for one record shape (achievement or quest progress).
///
/// `upsert` is the only write and is revision-checked: a record at revision
/// `n` writes only if the stored revision is still `n` (with `n = 0` meaning
/// the record must not exist yet), and comes back at revision `n + 1`.
/// Concurrent writers race on the revision instead of a lock, so different
/// `(user, target)` keys never contend.
#[async_trait::async_trait]
pub trait ProgressStore<R: ProgressRecord>: Send + Sync {
    /// Look up the record for a user and target.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the lookup fails.
    async fn find(&self, user_id: &UserId, target_id: &R::TargetId)
    -> Result<Option<R>, StoreError>;

    /// Write a record, conditional on its revision, returning it with the
    /// bumped revision.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RevisionConflict`] when another writer won the
    /// race, [`StoreError::Duplicate`] when a zero-revision record already
    /// exists, and [`StoreError::Database`] for everything else.
    async fn upsert(&self, record: R) -> Result<R, StoreError>;

    /// All of a user's records, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    async fn find_by_user(
        &self,
        user_id: &UserId,
        status: Option<ProgressStatus>,
    ) -> Result<Vec<R>, StoreError>;
}

/// Read access to achievement definitions.
#[async_trait::async_trait]
pub trait AchievementCatalog: Send + Sync {
    /// Look up an achievement definition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the lookup fails.
    async fn find(&self, id: &AchievementId) -> Result<Option<Achievement>, StoreError>;
}

/// Read access to quest definitions.
#[async_trait::async_trait]
pub trait QuestCatalog: Send + Sync {
    /// Look up a quest definition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the lookup fails.
    async fn find(&self, id: &QuestId) -> Result<Option<Quest>, StoreError>;

    /// Every quest definition. Used to route event-fed objectives.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    async fn all(&self) -> Result<Vec<Quest>, StoreError>;
}

/// Errors from reward grants.
#[derive(Error, Debug, Clone)]
pub enum GrantError {
    /// The user does not exist in the identity service.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The grant call failed.
    #[error("grant failed: {0}")]
    Failed(String),
}

/// The identity service's reward surface.
///
/// Grants may be retried after a failure, so one completion can reach a
/// grant more than once. Implementations must tolerate that (the persisted
/// rewards-collected flag keeps it rare, not impossible).
#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    /// Credit points to a user's balance.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::UserNotFound`] for unknown users and
    /// [`GrantError::Failed`] for transport or service failures.
    async fn grant_points(&self, user_id: &UserId, amount: u32) -> Result<(), GrantError>;

    /// Credit experience toward a user's level.
    ///
    /// # Errors
    ///
    /// Returns [`GrantError::UserNotFound`] for unknown users and
    /// [`GrantError::Failed`] for transport or service failures.
    async fn grant_experience(&self, user_id: &UserId, amount: u32) -> Result<(), GrantError>;
}
