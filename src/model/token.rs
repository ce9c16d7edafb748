//! Token — API credential with a per-kind concurrency cap (spec §3, §4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "token_kind", rename_all = "lowercase")]
pub enum TokenKind {
    GitHub,
    GitLab,
    Meetup,
}

impl TokenKind {
    /// `MAX_JOBS_TOKEN` per spec §3: GitHub=3, GitLab=3, Meetup=1.
    pub fn max_jobs(self) -> i64 {
        match self {
            TokenKind::GitHub => 3,
            TokenKind::GitLab => 3,
            TokenKind::Meetup => 1,
        }
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub kind: TokenKind,
    pub user_id: Uuid,
    pub secret: String,
    pub reset_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Token {
    /// Tokens owned by `user` of `kind` with `count(jobs) < MAX_JOBS_TOKEN`,
    /// locked for update so the capacity check and the later attach are
    /// consistent (spec §9: "do not rely on optimistic counts"). `NOWAIT` so
    /// a concurrently-racing admission surfaces as `Contention` (spec §4.2/
    /// §7) instead of blocking behind another worker's transaction.
    pub async fn eligible_for_user(
        user_id: Uuid,
        kind: TokenKind,
        db: &mut sqlx::PgConnection,
    ) -> Result<Vec<Self>, crate::error::SchedulerError> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT t.id, t.kind, t.user_id, t.secret, t.reset_at, t.created_at
            FROM tokens t
            WHERE t.user_id = $1 AND t.kind = $2
              AND (SELECT COUNT(*) FROM token_jobs tj WHERE tj.token_id = t.id) < $3
            FOR UPDATE OF t NOWAIT
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(kind.max_jobs())
        .fetch_all(db)
        .await
        .map_err(crate::error::SchedulerError::from_lock_attempt)
    }

    /// Whether `user` owns at least one ready (`reset_at < now`), uncapped
    /// token of `kind` — the selectability gate in spec §4.1.
    pub async fn has_ready_for_user(
        user_id: Uuid,
        kind: TokenKind,
        db: &sqlx::PgPool,
    ) -> sqlx::Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM tokens t
            WHERE t.user_id = $1 AND t.kind = $2 AND t.reset_at < NOW()
              AND (SELECT COUNT(*) FROM token_jobs tj WHERE tj.token_id = t.id) < $3
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(kind.max_jobs())
        .fetch_one(db)
        .await?;
        Ok(count > 0)
    }

    pub async fn attach(&self, job_id: Uuid, db: &mut sqlx::PgConnection) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO token_jobs (token_id, job_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(self.id)
            .bind(job_id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// The first ready token attached to `job_id`, used by `run` to pick the
    /// credential to hand the task runner (spec §4.3).
    pub async fn first_ready_attached(
        job_id: Uuid,
        db: &sqlx::PgPool,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT t.id, t.kind, t.user_id, t.secret, t.reset_at, t.created_at
            FROM tokens t
            JOIN token_jobs tj ON tj.token_id = t.id
            WHERE tj.job_id = $1 AND t.reset_at < NOW()
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .fetch_optional(db)
        .await
    }

    /// Stamp `reset_at` after a rate-limit response, with the 2-minute grace
    /// padding spec §4.3 specifies.
    pub async fn stamp_reset(&self, minutes: i64, db: &sqlx::PgPool) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE tokens SET reset_at = NOW() + (($1 || ' minutes')::INTERVAL) + INTERVAL '2 minutes' WHERE id = $2",
        )
        .bind(minutes)
        .bind(self.id)
        .execute(db)
        .await?;
        Ok(())
    }
}
