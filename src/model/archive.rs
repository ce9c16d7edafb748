//! Terminal state: Job -> ArchJob, Intention -> ArchivedIntention (spec §3, §4.1 `archive`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::model::IntentionKindId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "archived_status", rename_all = "lowercase")]
pub enum ArchivedStatus {
    Ok,
    Error,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ArchJob {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
    pub worker_id: Option<Uuid>,
    pub log_location: Option<String>,
}

impl ArchJob {
    /// Archive `job`, keeping its `created_at`/`worker`/`log_location` (spec §3 ArchJob),
    /// then delete the live job row. Only safe once nothing still references
    /// `job.id` (i.e. no bound intentions) — see [`Self::record_only`] /
    /// [`Self::delete_job`] for the split version used when intentions must
    /// be archived first.
    pub async fn from_job(job: &crate::model::Job, db: &mut sqlx::PgConnection) -> sqlx::Result<Self> {
        let arch = Self::record_only(job, db).await?;
        Self::delete_job(job.id, db).await?;
        Ok(arch)
    }

    /// Insert the `arch_jobs` row without deleting `jobs`. Used when live
    /// intentions still reference the job and must be archived (and thus
    /// deleted) first, since `intentions.job_id` carries no cascade.
    pub async fn record_only(job: &crate::model::Job, db: &mut sqlx::PgConnection) -> sqlx::Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO arch_jobs (id, created_at, worker_id, log_location)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at, archived_at, worker_id, log_location
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job.created_at)
        .bind(job.worker_id)
        .bind(&job.log_location)
        .fetch_one(&mut *db)
        .await
    }

    pub async fn delete_job(job_id: Uuid, db: &mut sqlx::PgConnection) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(&mut *db)
            .await?;
        Ok(())
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedIntention {
    pub id: Uuid,
    pub kind: IntentionKindId,
    pub user_id: Uuid,
    pub repo_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: ArchivedStatus,
    pub arch_job_id: Uuid,
}

impl ArchivedIntention {
    /// Insert the archived record and delete the live intention row in one
    /// transaction step (spec §4.1 `archive`).
    pub async fn record(
        intention: &crate::model::Intention,
        status: ArchivedStatus,
        arch_job_id: Uuid,
        db: &mut sqlx::PgConnection,
    ) -> sqlx::Result<Self> {
        let archived = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO archived_intentions (id, kind, user_id, repo_id, created_at, status, arch_job_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, kind, user_id, repo_id, created_at, completed_at, status, arch_job_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(intention.kind)
        .bind(intention.user_id)
        .bind(intention.repo_id)
        .bind(intention.created_at)
        .bind(status)
        .bind(arch_job_id)
        .fetch_one(&mut *db)
        .await?;

        sqlx::query("DELETE FROM intentions WHERE id = $1")
            .bind(intention.id)
            .execute(&mut *db)
            .await?;

        Ok(archived)
    }
}
