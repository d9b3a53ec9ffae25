//! User repository implementation.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use framelab_core::{Error, Result, SubscriptionTier, User, UserRepository};

/// PostgreSQL implementation of UserRepository.
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    /// Create a new PgUserRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub(crate) fn parse_user_row(row: sqlx::postgres::PgRow) -> User {
        let tier: String = row.get("subscription_tier");
        User {
            id: row.get("id"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            // Unknown tiers in the row degrade to free rather than erroring
            subscription_tier: SubscriptionTier::parse(&tier).unwrap_or(SubscriptionTier::Free),
            is_active: row.get("is_active"),
            is_deleted: row.get("is_deleted"),
            deleted_at: row.get("deleted_at"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn fetch(&self, id: Uuid) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, subscription_tier, is_active, is_deleted,
                    deleted_at, created_at
             FROM app_user WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_user_row).ok_or(Error::UserNotFound(id))
    }

    async fn exists(&self, id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM app_user WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(exists)
    }
}
