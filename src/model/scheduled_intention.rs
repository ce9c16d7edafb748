//! ScheduledIntention — description of a future/periodic intention creation
//! (spec §3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::model::IntentionKindId;

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledIntention {
    pub id: Uuid,
    pub intention_kind: IntentionKindId,
    pub kwargs: serde_json::Value,
    pub user_id: Uuid,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub depends_on: Option<Uuid>,
    pub repeat_hours: Option<i32>,
    pub worker_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledIntention {
    /// Bulk-claim rows due now, unclaimed, by this worker (spec §4.4).
    pub async fn claim_due(worker_id: Uuid, db: &sqlx::PgPool) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            WITH due AS (
                SELECT id FROM scheduled_intentions
                WHERE scheduled_at <= NOW() AND worker_id IS NULL
                FOR UPDATE SKIP LOCKED
            )
            UPDATE scheduled_intentions
            SET worker_id = $1
            WHERE id IN (SELECT id FROM due)
            RETURNING id, intention_kind, kwargs, user_id, scheduled_at, depends_on, repeat_hours, worker_id, created_at
            "#,
        )
        .bind(worker_id)
        .fetch_all(db)
        .await
    }

    /// Child rows whose `depends_on` is this row (spec §4.4 recursion).
    pub async fn children(&self, db: &sqlx::PgPool) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT id, intention_kind, kwargs, user_id, scheduled_at, depends_on, repeat_hours, worker_id, created_at
             FROM scheduled_intentions WHERE depends_on = $1",
        )
        .bind(self.id)
        .fetch_all(db)
        .await
    }

    /// Advance `scheduled_at` by `repeat_hours` if set, then release the
    /// worker claim (spec §4.4: batch always ends with `worker = NULL`).
    pub async fn advance_and_release(&self, db: &sqlx::PgPool) -> sqlx::Result<()> {
        if let (Some(at), Some(hours)) = (self.scheduled_at, self.repeat_hours) {
            if hours > 0 {
                let next = at + chrono::Duration::hours(hours as i64);
                sqlx::query(
                    "UPDATE scheduled_intentions SET scheduled_at = $1, worker_id = NULL WHERE id = $2",
                )
                .bind(next)
                .bind(self.id)
                .execute(db)
                .await?;
                return Ok(());
            }
        }

        sqlx::query("UPDATE scheduled_intentions SET worker_id = NULL WHERE id = $1")
            .bind(self.id)
            .execute(db)
            .await?;
        Ok(())
    }
}
