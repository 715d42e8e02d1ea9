//! Revision-checked progress stores backed by PostgreSQL.
//!
//! One table per record shape, one row per `(user, target)`. An upsert
//! carries the revision the writer read: inserts require no row to exist,
//! updates require the row to still hold that revision. Lost races surface
//! as retryable [`StoreError`]s and are counted, never silently merged.

use questline_core::progress::{
    AchievementProgress, ObjectiveProgress, ProgressRecord, ProgressStatus, QuestProgress,
};
use questline_core::store::{ProgressStore, StoreError};
use questline_core::target::{AchievementId, QuestId, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

// ============================================================================
// Column conversions
// ============================================================================

fn db_revision(revision: u64) -> Result<i64, StoreError> {
    i64::try_from(revision)
        .map_err(|_| StoreError::Serialization(format!("revision {revision} out of range")))
}

fn revision_from_db(raw: i64) -> Result<u64, StoreError> {
    u64::try_from(raw)
        .map_err(|_| StoreError::Serialization(format!("negative stored revision {raw}")))
}

fn value_from_db(raw: i64) -> Result<u32, StoreError> {
    u32::try_from(raw)
        .map_err(|_| StoreError::Serialization(format!("stored value {raw} out of range")))
}

fn status_from_db(raw: &str) -> Result<ProgressStatus, StoreError> {
    ProgressStatus::parse(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn objectives_to_db(objectives: &[ObjectiveProgress]) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(objectives).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn objectives_from_db(raw: serde_json::Value) -> Result<Vec<ObjectiveProgress>, StoreError> {
    serde_json::from_value(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ============================================================================
// Achievement progress
// ============================================================================

/// sqlx-backed [`ProgressStore`] for achievement records.
pub struct PostgresAchievementStore {
    pool: PgPool,
}

impl PostgresAchievementStore {
    /// Create a store over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &PgRow) -> Result<AchievementProgress, StoreError> {
        Ok(AchievementProgress {
            user_id: UserId::new(row.get::<String, _>("user_id")),
            achievement_id: AchievementId::new(row.get::<String, _>("achievement_id")),
            value: value_from_db(row.get("value"))?,
            status: status_from_db(row.get::<String, _>("status").as_str())?,
            rewards_collected: row.get("rewards_collected"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            expires_at: row.get("expires_at"),
            revision: revision_from_db(row.get("revision"))?,
        })
    }

    async fn stored_revision(
        &self,
        user_id: &UserId,
        achievement_id: &AchievementId,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r"
            SELECT revision FROM achievement_progress
            WHERE user_id = $1 AND achievement_id = $2
            ",
        )
        .bind(user_id.as_str())
        .bind(achievement_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map_or(Ok(0), |row| revision_from_db(row.get("revision")))
    }
}

#[async_trait::async_trait]
impl ProgressStore<AchievementProgress> for PostgresAchievementStore {
    async fn find(
        &self,
        user_id: &UserId,
        target_id: &AchievementId,
    ) -> Result<Option<AchievementProgress>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT user_id, achievement_id, value, status, rewards_collected,
                   started_at, completed_at, expires_at, revision
            FROM achievement_progress
            WHERE user_id = $1 AND achievement_id = $2
            ",
        )
        .bind(user_id.as_str())
        .bind(target_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(|row| Self::row_to_record(&row)).transpose()
    }

    async fn upsert(&self, record: AchievementProgress) -> Result<AchievementProgress, StoreError> {
        let expected = record.revision;
        let next = db_revision(expected + 1)?;

        let rows_affected = if expected == 0 {
            sqlx::query(
                r"
                INSERT INTO achievement_progress
                    (user_id, achievement_id, value, status, rewards_collected,
                     started_at, completed_at, expires_at, revision)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (user_id, achievement_id) DO NOTHING
                ",
            )
            .bind(record.user_id.as_str())
            .bind(record.achievement_id.as_str())
            .bind(i64::from(record.value))
            .bind(record.status.as_str())
            .bind(record.rewards_collected)
            .bind(record.started_at)
            .bind(record.completed_at)
            .bind(record.expires_at)
            .bind(next)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .rows_affected()
        } else {
            sqlx::query(
                r"
                UPDATE achievement_progress
                SET value = $3, status = $4, rewards_collected = $5,
                    started_at = $6, completed_at = $7, expires_at = $8,
                    revision = $9, updated_at = now()
                WHERE user_id = $1 AND achievement_id = $2 AND revision = $10
                ",
            )
            .bind(record.user_id.as_str())
            .bind(record.achievement_id.as_str())
            .bind(i64::from(record.value))
            .bind(record.status.as_str())
            .bind(record.rewards_collected)
            .bind(record.started_at)
            .bind(record.completed_at)
            .bind(record.expires_at)
            .bind(next)
            .bind(db_revision(expected)?)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .rows_affected()
        };

        if rows_affected == 0 {
            metrics::counter!("progress_store.conflicts", "record" => "achievement").increment(1);
            if expected == 0 {
                tracing::debug!(
                    user_id = %record.user_id,
                    achievement_id = %record.achievement_id,
                    "achievement insert lost to an existing row"
                );
                return Err(StoreError::Duplicate {
                    user_id: record.user_id.to_string(),
                    target_id: record.achievement_id.to_string(),
                });
            }
            let actual = self
                .stored_revision(&record.user_id, &record.achievement_id)
                .await?;
            tracing::debug!(
                user_id = %record.user_id,
                achievement_id = %record.achievement_id,
                expected,
                actual,
                "achievement update lost the revision race"
            );
            return Err(StoreError::RevisionConflict { expected, actual });
        }

        Ok(record.with_revision(expected + 1))
    }

    async fn find_by_user(
        &self,
        user_id: &UserId,
        status: Option<ProgressStatus>,
    ) -> Result<Vec<AchievementProgress>, StoreError> {
        let fetched = if let Some(status) = status {
            sqlx::query(
                r"
                SELECT user_id, achievement_id, value, status, rewards_collected,
                       started_at, completed_at, expires_at, revision
                FROM achievement_progress
                WHERE user_id = $1 AND status = $2
                ORDER BY achievement_id
                ",
            )
            .bind(user_id.as_str())
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r"
                SELECT user_id, achievement_id, value, status, rewards_collected,
                       started_at, completed_at, expires_at, revision
                FROM achievement_progress
                WHERE user_id = $1
                ORDER BY achievement_id
                ",
            )
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
        };

        let rows = fetched.map_err(|e| StoreError::Database(e.to_string()))?;
        rows.iter().map(Self::row_to_record).collect()
    }
}

// ============================================================================
// Quest progress
// ============================================================================

/// sqlx-backed [`ProgressStore`] for quest records.
///
/// Per-objective progress is held as a JSONB array in definition order;
/// the row-level columns mirror the achievement table so both stores share
/// one concurrency story.
pub struct PostgresQuestStore {
    pool: PgPool,
}

impl PostgresQuestStore {
    /// Create a store over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &PgRow) -> Result<QuestProgress, StoreError> {
        Ok(QuestProgress {
            user_id: UserId::new(row.get::<String, _>("user_id")),
            quest_id: QuestId::new(row.get::<String, _>("quest_id")),
            objectives: objectives_from_db(row.get("objectives"))?,
            status: status_from_db(row.get::<String, _>("status").as_str())?,
            rewards_collected: row.get("rewards_collected"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            expires_at: row.get("expires_at"),
            revision: revision_from_db(row.get("revision"))?,
        })
    }

    async fn stored_revision(
        &self,
        user_id: &UserId,
        quest_id: &QuestId,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r"
            SELECT revision FROM quest_progress
            WHERE user_id = $1 AND quest_id = $2
            ",
        )
        .bind(user_id.as_str())
        .bind(quest_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map_or(Ok(0), |row| revision_from_db(row.get("revision")))
    }
}

#[async_trait::async_trait]
impl ProgressStore<QuestProgress> for PostgresQuestStore {
    async fn find(
        &self,
        user_id: &UserId,
        target_id: &QuestId,
    ) -> Result<Option<QuestProgress>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT user_id, quest_id, objectives, status, rewards_collected,
                   started_at, completed_at, expires_at, revision
            FROM quest_progress
            WHERE user_id = $1 AND quest_id = $2
            ",
        )
        .bind(user_id.as_str())
        .bind(target_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(|row| Self::row_to_record(&row)).transpose()
    }

    async fn upsert(&self, record: QuestProgress) -> Result<QuestProgress, StoreError> {
        let expected = record.revision;
        let next = db_revision(expected + 1)?;
        let objectives = objectives_to_db(&record.objectives)?;

        let rows_affected = if expected == 0 {
            sqlx::query(
                r"
                INSERT INTO quest_progress
                    (user_id, quest_id, objectives, status, rewards_collected,
                     started_at, completed_at, expires_at, revision)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (user_id, quest_id) DO NOTHING
                ",
            )
            .bind(record.user_id.as_str())
            .bind(record.quest_id.as_str())
            .bind(objectives)
            .bind(record.status.as_str())
            .bind(record.rewards_collected)
            .bind(record.started_at)
            .bind(record.completed_at)
            .bind(record.expires_at)
            .bind(next)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .rows_affected()
        } else {
            sqlx::query(
                r"
                UPDATE quest_progress
                SET objectives = $3, status = $4, rewards_collected = $5,
                    started_at = $6, completed_at = $7, expires_at = $8,
                    revision = $9, updated_at = now()
                WHERE user_id = $1 AND quest_id = $2 AND revision = $10
                ",
            )
            .bind(record.user_id.as_str())
            .bind(record.quest_id.as_str())
            .bind(objectives)
            .bind(record.status.as_str())
            .bind(record.rewards_collected)
            .bind(record.started_at)
            .bind(record.completed_at)
            .bind(record.expires_at)
            .bind(next)
            .bind(db_revision(expected)?)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .rows_affected()
        };

        if rows_affected == 0 {
            metrics::counter!("progress_store.conflicts", "record" => "quest").increment(1);
            if expected == 0 {
                tracing::debug!(
                    user_id = %record.user_id,
                    quest_id = %record.quest_id,
                    "quest insert lost to an existing row"
                );
                return Err(StoreError::Duplicate {
                    user_id: record.user_id.to_string(),
                    target_id: record.quest_id.to_string(),
                });
            }
            let actual = self
                .stored_revision(&record.user_id, &record.quest_id)
                .await?;
            tracing::debug!(
                user_id = %record.user_id,
                quest_id = %record.quest_id,
                expected,
                actual,
                "quest update lost the revision race"
            );
            return Err(StoreError::RevisionConflict { expected, actual });
        }

        Ok(record.with_revision(expected + 1))
    }

    async fn find_by_user(
        &self,
        user_id: &UserId,
        status: Option<ProgressStatus>,
    ) -> Result<Vec<QuestProgress>, StoreError> {
        let fetched = if let Some(status) = status {
            sqlx::query(
                r"
                SELECT user_id, quest_id, objectives, status, rewards_collected,
                       started_at, completed_at, expires_at, revision
                FROM quest_progress
                WHERE user_id = $1 AND status = $2
                ORDER BY quest_id
                ",
            )
            .bind(user_id.as_str())
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r"
                SELECT user_id, quest_id, objectives, status, rewards_collected,
                       started_at, completed_at, expires_at, revision
                FROM quest_progress
                WHERE user_id = $1
                ORDER BY quest_id
                ",
            )
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
        };

        let rows = fetched.map_err(|e| StoreError::Database(e.to_string()))?;
        rows.iter().map(Self::row_to_record).collect()
    }
}
