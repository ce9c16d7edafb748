//! Worker identity. Attributes per spec §3: `id`, `machine-hostname`,
//! `status`. Status never auto-transitions to DOWN; liveness is inferred by
//! absence (spec §9, open question on leases).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "worker_status", rename_all = "lowercase")]
pub enum WorkerStatus {
    #[default]
    Up,
    Down,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub machine_hostname: String,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
}

impl Worker {
    /// Register this process as a running worker. Called once at startup.
    pub async fn register(hostname: &str, db: &sqlx::PgPool) -> sqlx::Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO workers (id, machine_hostname, status)
            VALUES ($1, $2, 'up')
            RETURNING id, machine_hostname, status, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(hostname)
        .fetch_one(db)
        .await
    }
}
