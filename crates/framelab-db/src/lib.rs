//! # framelab-db
//!
//! PostgreSQL database layer for framelab.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for all core entities
//! - The delayed job queue backing the background worker
//! - The transactional staged account deletion workflow
//!
//! ## Example
//!
//! ```rust,ignore
//! use framelab_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/framelab").await?;
//!     let artifacts = db.artifacts.list_for_user(user_id).await?;
//!     Ok(())
//! }
//! ```
pub mod artifacts;
pub mod deletions;
pub mod jobs;
pub mod notifications;
pub mod pool;
pub mod users;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use framelab_core::*;

// Re-export repository implementations
pub use artifacts::PgArtifactRepository;
pub use deletions::PgDeletionRepository;
pub use jobs::PgJobRepository;
pub use notifications::PgNotificationRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use users::PgUserRepository;

use std::sync::Arc;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// User account repository.
    pub users: Arc<PgUserRepository>,
    /// Learning artifact repository.
    pub artifacts: Arc<PgArtifactRepository>,
    /// Notification queue and preferences repository.
    pub notifications: Arc<PgNotificationRepository>,
    /// Staged account deletion repository.
    pub deletions: Arc<PgDeletionRepository>,
    /// Job queue repository for background processing.
    pub jobs: Arc<PgJobRepository>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            artifacts: Arc::new(PgArtifactRepository::new(pool.clone())),
            notifications: Arc::new(PgNotificationRepository::new(pool.clone())),
            deletions: Arc::new(PgDeletionRepository::new(pool.clone())),
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            users: self.users.clone(),
            artifacts: self.artifacts.clone(),
            notifications: self.notifications.clone(),
            deletions: self.deletions.clone(),
            jobs: self.jobs.clone(),
        }
    }
}
