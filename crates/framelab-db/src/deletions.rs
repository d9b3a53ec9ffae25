//! Staged account deletion repository implementation.
//!
//! Every stage runs its data mutations and the stage marker update in one
//! transaction. The marker update is guarded on the expected current stage,
//! so a retried or concurrent transition misses the guard and surfaces as
//! `InvalidStageTransition` instead of applying twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use framelab_core::{
    anonymized_email, defaults::ANONYMIZED_PASSWORD_SENTINEL, DeletionImpact, DeletionReason,
    DeletionRepository, DeletionRequest, DeletionStage, Error, Result,
};

/// PostgreSQL implementation of DeletionRepository.
pub struct PgDeletionRepository {
    pool: Pool<Postgres>,
}

const DELETION_COLUMNS: &str = "id, user_id, stage, reason, requested_at, cancellable_until, \
                                soft_deleted_at, anonymized_at, cancelled_at";

impl PgDeletionRepository {
    /// Create a new PgDeletionRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_deletion_row(row: sqlx::postgres::PgRow) -> Result<DeletionRequest> {
        let stage: String = row.get("stage");
        let reason: String = row.get("reason");
        Ok(DeletionRequest {
            id: row.get("id"),
            user_id: row.get("user_id"),
            stage: DeletionStage::parse(&stage)
                .ok_or_else(|| Error::Internal(format!("unknown deletion stage '{stage}'")))?,
            reason: DeletionReason::parse(&reason)
                .ok_or_else(|| Error::Internal(format!("unknown deletion reason '{reason}'")))?,
            requested_at: row.get("requested_at"),
            cancellable_until: row.get("cancellable_until"),
            soft_deleted_at: row.get("soft_deleted_at"),
            anonymized_at: row.get("anonymized_at"),
            cancelled_at: row.get("cancelled_at"),
        })
    }

    /// Move the stage marker, guarded on the expected current stage.
    ///
    /// Returns the updated request, or `InvalidStageTransition` naming the
    /// stage actually found when the guard missed.
    async fn advance_stage(
        tx: &mut Transaction<'_, Postgres>,
        deletion_id: Uuid,
        from: DeletionStage,
        to: DeletionStage,
        timestamp_column: &str,
    ) -> Result<DeletionRequest> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "UPDATE deletion_request
             SET stage = $1, {timestamp_column} = $2
             WHERE id = $3 AND stage = $4
             RETURNING {DELETION_COLUMNS}"
        ))
        .bind(to.as_str())
        .bind(now)
        .bind(deletion_id)
        .bind(from.as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_deletion_row(row),
            None => {
                let actual: Option<String> =
                    sqlx::query_scalar("SELECT stage FROM deletion_request WHERE id = $1")
                        .bind(deletion_id)
                        .fetch_optional(&mut **tx)
                        .await
                        .map_err(Error::Database)?;
                Err(Error::InvalidStageTransition {
                    from: actual.unwrap_or_else(|| "missing".to_string()),
                    to: to.as_str().to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl DeletionRepository for PgDeletionRepository {
    async fn create(&self, req: &DeletionRequest) -> Result<()> {
        sqlx::query(
            "INSERT INTO deletion_request
                 (id, user_id, stage, reason, requested_at, cancellable_until,
                  soft_deleted_at, anonymized_at, cancelled_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(req.id)
        .bind(req.user_id)
        .bind(req.stage.as_str())
        .bind(req.reason.as_str())
        .bind(req.requested_at)
        .bind(req.cancellable_until)
        .bind(req.soft_deleted_at)
        .bind(req.anonymized_at)
        .bind(req.cancelled_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fetch(&self, deletion_id: Uuid) -> Result<Option<DeletionRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {DELETION_COLUMNS} FROM deletion_request WHERE id = $1"
        ))
        .bind(deletion_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_deletion_row).transpose()
    }

    async fn active_for_user(&self, user_id: Uuid) -> Result<Option<DeletionRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {DELETION_COLUMNS} FROM deletion_request
             WHERE user_id = $1 AND stage NOT IN ('hard_deleted', 'cancelled')
             ORDER BY requested_at DESC
             LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_deletion_row).transpose()
    }

    async fn apply_soft_delete(&self, deletion_id: Uuid) -> Result<DeletionRequest> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let request = Self::advance_stage(
            &mut tx,
            deletion_id,
            DeletionStage::Requested,
            DeletionStage::SoftDeleted,
            "soft_deleted_at",
        )
        .await?;

        let updated = sqlx::query(
            "UPDATE app_user SET is_active = false, is_deleted = true, deleted_at = $1
             WHERE id = $2",
        )
        .bind(now)
        .bind(request.user_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            // Rolls back the stage marker along with everything else.
            return Err(Error::StageTransitionFailed(format!(
                "user {} missing during soft delete",
                request.user_id
            )));
        }

        tx.commit().await.map_err(Error::Database)?;
        info!(deletion_id = %deletion_id, user_id = %request.user_id, "Account soft deleted");
        Ok(request)
    }

    async fn apply_anonymization(&self, deletion_id: Uuid) -> Result<DeletionRequest> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let request = Self::advance_stage(
            &mut tx,
            deletion_id,
            DeletionStage::SoftDeleted,
            DeletionStage::Anonymized,
            "anonymized_at",
        )
        .await?;

        let updated = sqlx::query(
            "UPDATE app_user SET email = $1, password_hash = $2 WHERE id = $3",
        )
        .bind(anonymized_email(request.user_id))
        .bind(ANONYMIZED_PASSWORD_SENTINEL)
        .bind(request.user_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::StageTransitionFailed(format!(
                "user {} missing during anonymization",
                request.user_id
            )));
        }

        // Scrub free-text personal content; keep the rows so aggregate
        // analytics retain their shape.
        sqlx::query("UPDATE learning_session SET notes = NULL WHERE user_id = $1")
            .bind(request.user_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE notification SET subject = '', message = '', action_url = NULL,
                 metadata = NULL
             WHERE user_id = $1",
        )
        .bind(request.user_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        info!(deletion_id = %deletion_id, user_id = %request.user_id, "Account anonymized");
        Ok(request)
    }

    async fn apply_hard_delete(
        &self,
        deletion_id: Uuid,
        retention_cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Guard on the stage without moving the marker: the request row is
        // itself removed at the end of this transaction.
        let row = sqlx::query("SELECT user_id, stage FROM deletion_request WHERE id = $1")
            .bind(deletion_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(0);
        };
        let user_id: Uuid = row.get("user_id");
        let stage: String = row.get("stage");
        if DeletionStage::parse(&stage) != Some(DeletionStage::Anonymized) {
            return Err(Error::InvalidStageTransition {
                from: stage,
                to: DeletionStage::HardDeleted.as_str().to_string(),
            });
        }

        let mut removed: u64 = 0;
        for sql in [
            "DELETE FROM learning_session WHERE user_id = $1",
            "DELETE FROM badge WHERE user_id = $1",
            "DELETE FROM artifact WHERE user_id = $1",
            "DELETE FROM notification_preferences WHERE user_id = $1",
            "DELETE FROM job_queue WHERE user_id = $1 AND status IN ('pending', 'running')",
        ] {
            let result = sqlx::query(sql)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
            removed += result.rows_affected();
        }

        // Recent (already anonymized) notification history is retained for
        // audit; `user_id` nulls out when the user row goes.
        let notifications = sqlx::query(
            "DELETE FROM notification WHERE user_id = $1 AND created_at < $2",
        )
        .bind(user_id)
        .bind(retention_cutoff)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        removed += notifications.rows_affected();

        let request_removed = sqlx::query("DELETE FROM deletion_request WHERE id = $1")
            .bind(deletion_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        removed += request_removed.rows_affected();

        let user_removed = sqlx::query("DELETE FROM app_user WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        removed += user_removed.rows_affected();

        tx.commit().await.map_err(Error::Database)?;
        info!(deletion_id = %deletion_id, user_id = %user_id, rows_removed = removed,
              "Account hard deleted");
        Ok(removed)
    }

    async fn apply_cancellation(&self, deletion_id: Uuid) -> Result<DeletionRequest> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "UPDATE deletion_request
             SET stage = 'cancelled', cancelled_at = $1
             WHERE id = $2 AND stage IN ('requested', 'soft_deleted')
             RETURNING {DELETION_COLUMNS}"
        ))
        .bind(now)
        .bind(deletion_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let request = match row {
            Some(row) => Self::parse_deletion_row(row)?,
            None => {
                let actual: Option<String> =
                    sqlx::query_scalar("SELECT stage FROM deletion_request WHERE id = $1")
                        .bind(deletion_id)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(Error::Database)?;
                warn!(deletion_id = %deletion_id, stage = ?actual,
                      "Cancellation rejected by stage guard");
                return Err(Error::InvalidStageTransition {
                    from: actual.unwrap_or_else(|| "missing".to_string()),
                    to: DeletionStage::Cancelled.as_str().to_string(),
                });
            }
        };

        let restored = sqlx::query(
            "UPDATE app_user SET is_active = true, is_deleted = false, deleted_at = NULL
             WHERE id = $1",
        )
        .bind(request.user_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if restored.rows_affected() == 0 {
            return Err(Error::StageTransitionFailed(format!(
                "user {} missing during cancellation",
                request.user_id
            )));
        }

        tx.commit().await.map_err(Error::Database)?;
        info!(deletion_id = %deletion_id, user_id = %request.user_id, "Deletion cancelled");
        Ok(request)
    }

    async fn estimate_impact(&self, user_id: Uuid) -> Result<DeletionImpact> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM artifact WHERE user_id = $1) AS artifacts,
                (SELECT COUNT(*) FROM learning_session WHERE user_id = $1) AS learning_sessions,
                (SELECT COUNT(*) FROM badge WHERE user_id = $1) AS badges,
                (SELECT COUNT(*) FROM notification WHERE user_id = $1) AS notifications,
                (SELECT COUNT(*) FROM notification_preferences WHERE user_id = $1) AS preferences",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(DeletionImpact {
            artifacts: row.get("artifacts"),
            learning_sessions: row.get("learning_sessions"),
            badges: row.get("badges"),
            notifications: row.get("notifications"),
            preferences: row.get("preferences"),
        })
    }
}
