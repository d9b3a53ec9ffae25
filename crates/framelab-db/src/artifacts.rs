//! Learning artifact repository implementation.
//!
//! Review history is stored as an append-only jsonb array on the artifact
//! row; concurrent appends are serialized with a row lock so no committed
//! session is ever lost.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use framelab_core::{Artifact, ArtifactRepository, Error, Result, ReviewSession};

/// PostgreSQL implementation of ArtifactRepository.
pub struct PgArtifactRepository {
    pool: Pool<Postgres>,
}

impl PgArtifactRepository {
    /// Create a new PgArtifactRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_artifact_row(row: sqlx::postgres::PgRow) -> Result<Artifact> {
        let history: JsonValue = row.get("review_history");
        let review_history: Vec<ReviewSession> = serde_json::from_value(history)?;
        Ok(Artifact {
            id: row.get("id"),
            user_id: row.get("user_id"),
            framework_name: row.get("framework_name"),
            kind: row.get("kind"),
            completed_at: row.get("completed_at"),
            review_history,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

const ARTIFACT_COLUMNS: &str =
    "id, user_id, framework_name, kind, completed_at, review_history, created_at, updated_at";

#[async_trait]
impl ArtifactRepository for PgArtifactRepository {
    async fn fetch(&self, id: Uuid) -> Result<Artifact> {
        let row = sqlx::query(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifact WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_artifact_row(row),
            None => Err(Error::ArtifactNotFound(id)),
        }
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Artifact>> {
        let rows = sqlx::query(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifact
             WHERE user_id = $1
             ORDER BY completed_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_artifact_row).collect()
    }

    async fn append_review_session(
        &self,
        artifact_id: Uuid,
        session: ReviewSession,
    ) -> Result<Artifact> {
        let now = Utc::now();
        let session_json = serde_json::to_value(&session)?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Row lock so two concurrent completions both land in the history.
        let locked = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM artifact WHERE id = $1 FOR UPDATE",
        )
        .bind(artifact_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if locked.is_none() {
            return Err(Error::ArtifactNotFound(artifact_id));
        }

        let row = sqlx::query(&format!(
            "UPDATE artifact
             SET review_history = review_history || $1::jsonb, updated_at = $2
             WHERE id = $3
             RETURNING {ARTIFACT_COLUMNS}"
        ))
        .bind(&session_json)
        .bind(now)
        .bind(artifact_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Self::parse_artifact_row(row)
    }
}
