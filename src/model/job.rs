//! Job model — a concrete unit of running work (spec §3).
//!
//! Grounded on the teacher's `kernel/jobs/job.rs::claim_jobs`: a
//! `FOR UPDATE SKIP LOCKED` CTE feeding an `UPDATE ... RETURNING`, so the
//! claim is atomic and never blocks a contending worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub worker_id: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub log_location: Option<String>,
}

impl Job {
    /// Create a new job reserved for `worker`. Used by `create_job` (spec §4.1).
    pub async fn create(worker_id: Uuid, db: &sqlx::PgPool) -> sqlx::Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO jobs (id, worker_id, claimed_at)
            VALUES ($1, $2, NOW())
            RETURNING id, created_at, worker_id, claimed_at, log_location
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(worker_id)
        .fetch_one(db)
        .await
    }

    /// Atomically claim the first resumable job of `kind` whose worker slot
    /// is free and whose attached tokens (if any) are all ready. Mirrors
    /// `claim_jobs`'s `FOR UPDATE SKIP LOCKED` pattern but scoped by kind and
    /// token readiness instead of a lease expiry.
    ///
    /// `token_gated` is false for Git (no token kind); when true, a job only
    /// qualifies if every token attached to it has `reset_at < now()` (or it
    /// has no tokens attached at all).
    pub async fn claim_next_resumable(
        kind: super::IntentionKindId,
        worker_id: Uuid,
        db: &sqlx::PgPool,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            WITH candidate AS (
                SELECT j.id
                FROM jobs j
                JOIN intentions i ON i.job_id = j.id AND i.kind = $1
                WHERE j.worker_id IS NULL
                  AND NOT EXISTS (
                      SELECT 1 FROM token_jobs tj
                      JOIN tokens t ON t.id = tj.token_id
                      WHERE tj.job_id = j.id AND t.reset_at > NOW()
                  )
                LIMIT 1
                FOR UPDATE OF j SKIP LOCKED
            )
            UPDATE jobs
            SET worker_id = $2, claimed_at = NOW()
            WHERE id IN (SELECT id FROM candidate)
            RETURNING id, created_at, worker_id, claimed_at, log_location
            "#,
        )
        .bind(kind)
        .bind(worker_id)
        .fetch_optional(db)
        .await
    }

    /// Release a job back to the resumable pool (suspended run, spec §4.2 step 5).
    pub async fn release(job_id: Uuid, db: &sqlx::PgPool) -> sqlx::Result<()> {
        sqlx::query("UPDATE jobs SET worker_id = NULL WHERE id = $1")
            .bind(job_id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Count of jobs currently claimed by any worker, used by the admit-gate
    /// in spec §4.2 step 3 (`< 5 * worker_count`).
    pub async fn count_claimed(db: &sqlx::PgPool) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE worker_id IS NOT NULL")
            .fetch_one(db)
            .await
    }
}
