//! Durable reward balances.
//!
//! The default [`UserDirectory`] wiring: grants accumulate into a per-user
//! balance row instead of calling out to a separate identity service.
//! Deployments that own one swap it in at the trait seam; the progression
//! events (`user.points.added`, `user.experience.added`) flow either way.

use questline_core::store::{GrantError, UserDirectory};
use questline_core::target::UserId;
use sqlx::PgPool;

/// [`UserDirectory`] keeping point and experience balances in Postgres.
///
/// Grants are additive upserts, so retried dispatches add again. The
/// tracker's persisted rewards-collected flag keeps that rare; the trade is
/// documented on the trait.
#[derive(Clone)]
pub struct PostgresUserDirectory {
    pool: PgPool,
}

impl PostgresUserDirectory {
    /// Create a directory over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserDirectory for PostgresUserDirectory {
    async fn grant_points(&self, user_id: &UserId, amount: u32) -> Result<(), GrantError> {
        sqlx::query(
            r"
            INSERT INTO user_rewards (user_id, points)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET points = user_rewards.points + EXCLUDED.points,
                          updated_at = now()
            ",
        )
        .bind(user_id.as_str())
        .bind(i64::from(amount))
        .execute(&self.pool)
        .await
        .map_err(|e| GrantError::Failed(e.to_string()))?;

        tracing::debug!(user_id = %user_id, amount, "points credited");
        Ok(())
    }

    async fn grant_experience(&self, user_id: &UserId, amount: u32) -> Result<(), GrantError> {
        sqlx::query(
            r"
            INSERT INTO user_rewards (user_id, experience)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET experience = user_rewards.experience + EXCLUDED.experience,
                          updated_at = now()
            ",
        )
        .bind(user_id.as_str())
        .bind(i64::from(amount))
        .execute(&self.pool)
        .await
        .map_err(|e| GrantError::Failed(e.to_string()))?;

        tracing::debug!(user_id = %user_id, amount, "experience credited");
        Ok(())
    }
}
