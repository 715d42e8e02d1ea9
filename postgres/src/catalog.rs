//! Definition catalogs backed by PostgreSQL.
//!
//! Read paths implement the core catalog traits; `upsert_definition` is the
//! write path used by seeding and operational tooling.

use questline_core::store::{AchievementCatalog, QuestCatalog, StoreError};
use questline_core::target::{Achievement, AchievementId, Objective, Quest, QuestId, Reward};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

fn u32_column(raw: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(raw)
        .map_err(|_| StoreError::Serialization(format!("column {column} out of range: {raw}")))
}

fn objectives_to_db(objectives: &[Objective]) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(objectives).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn objectives_from_db(raw: serde_json::Value) -> Result<Vec<Objective>, StoreError> {
    serde_json::from_value(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ============================================================================
// Achievement definitions
// ============================================================================

/// sqlx-backed [`AchievementCatalog`].
pub struct PostgresAchievementCatalog {
    pool: PgPool,
}

impl PostgresAchievementCatalog {
    /// Create a catalog over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_definition(row: &PgRow) -> Result<Achievement, StoreError> {
        Ok(Achievement {
            id: AchievementId::new(row.get::<String, _>("achievement_id")),
            name: row.get("name"),
            description: row.get("description"),
            threshold: u32_column(row.get("threshold"), "threshold")?,
            reward: Reward::new(
                u32_column(row.get("reward_points"), "reward_points")?,
                u32_column(row.get("reward_experience"), "reward_experience")?,
            ),
        })
    }

    /// Insert or update a definition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    pub async fn upsert_definition(&self, definition: &Achievement) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO achievement_definitions
                (achievement_id, name, description, threshold,
                 reward_points, reward_experience)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (achievement_id) DO UPDATE
            SET name = EXCLUDED.name,
                description = EXCLUDED.description,
                threshold = EXCLUDED.threshold,
                reward_points = EXCLUDED.reward_points,
                reward_experience = EXCLUDED.reward_experience,
                updated_at = now()
            ",
        )
        .bind(definition.id.as_str())
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(i64::from(definition.threshold))
        .bind(i64::from(definition.reward.points))
        .bind(i64::from(definition.reward.experience))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::info!(achievement_id = %definition.id, "achievement definition upserted");
        Ok(())
    }
}

#[async_trait::async_trait]
impl AchievementCatalog for PostgresAchievementCatalog {
    async fn find(&self, id: &AchievementId) -> Result<Option<Achievement>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT achievement_id, name, description, threshold,
                   reward_points, reward_experience
            FROM achievement_definitions
            WHERE achievement_id = $1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(|row| Self::row_to_definition(&row)).transpose()
    }
}

// ============================================================================
// Quest definitions
// ============================================================================

/// sqlx-backed [`QuestCatalog`].
///
/// Objectives live as a JSONB array in definition order, so reordering a
/// quest's objectives is a definition change, not a schema change.
pub struct PostgresQuestCatalog {
    pool: PgPool,
}

impl PostgresQuestCatalog {
    /// Create a catalog over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_definition(row: &PgRow) -> Result<Quest, StoreError> {
        let time_limit_secs = row
            .get::<Option<i64>, _>("time_limit_secs")
            .map(|raw| {
                u64::try_from(raw).map_err(|_| {
                    StoreError::Serialization(format!("column time_limit_secs out of range: {raw}"))
                })
            })
            .transpose()?;

        Ok(Quest {
            id: QuestId::new(row.get::<String, _>("quest_id")),
            name: row.get("name"),
            description: row.get("description"),
            objectives: objectives_from_db(row.get("objectives"))?,
            reward: Reward::new(
                u32_column(row.get("reward_points"), "reward_points")?,
                u32_column(row.get("reward_experience"), "reward_experience")?,
            ),
            time_limit_secs,
        })
    }

    /// Insert or update a definition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialization`] if the objectives do not encode
    /// and [`StoreError::Database`] if the write fails.
    pub async fn upsert_definition(&self, definition: &Quest) -> Result<(), StoreError> {
        let time_limit_secs = definition
            .time_limit_secs
            .map(|secs| {
                i64::try_from(secs).map_err(|_| {
                    StoreError::Serialization(format!("time limit out of range: {secs}"))
                })
            })
            .transpose()?;

        sqlx::query(
            r"
            INSERT INTO quest_definitions
                (quest_id, name, description, objectives,
                 reward_points, reward_experience, time_limit_secs)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (quest_id) DO UPDATE
            SET name = EXCLUDED.name,
                description = EXCLUDED.description,
                objectives = EXCLUDED.objectives,
                reward_points = EXCLUDED.reward_points,
                reward_experience = EXCLUDED.reward_experience,
                time_limit_secs = EXCLUDED.time_limit_secs,
                updated_at = now()
            ",
        )
        .bind(definition.id.as_str())
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(objectives_to_db(&definition.objectives)?)
        .bind(i64::from(definition.reward.points))
        .bind(i64::from(definition.reward.experience))
        .bind(time_limit_secs)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::info!(quest_id = %definition.id, "quest definition upserted");
        Ok(())
    }
}

#[async_trait::async_trait]
impl QuestCatalog for PostgresQuestCatalog {
    async fn find(&self, id: &QuestId) -> Result<Option<Quest>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT quest_id, name, description, objectives,
                   reward_points, reward_experience, time_limit_secs
            FROM quest_definitions
            WHERE quest_id = $1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(|row| Self::row_to_definition(&row)).transpose()
    }

    async fn all(&self) -> Result<Vec<Quest>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT quest_id, name, description, objectives,
                   reward_points, reward_experience, time_limit_secs
            FROM quest_definitions
            ORDER BY quest_id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_definition).collect()
    }
}
