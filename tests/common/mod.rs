//! Shared integration-test infrastructure: a Postgres container started once
//! and reused across tests, migrations run once. Grounded on the teacher's
//! `tests/common/harness.rs::SharedTestInfra` pattern.

use anyhow::{Context, Result};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct SharedInfra {
    db_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED: OnceCell<SharedInfra> = OnceCell::const_new();

impl SharedInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("failed to connect for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        pool.close().await;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED
            .get_or_init(|| async { Self::init().await.expect("shared test infra init failed") })
            .await
    }
}

static TEST_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// A fresh pool against the shared container, truncated to an empty schema
/// so tests don't see each other's rows. Holds a process-wide lock for the
/// guard's lifetime so scenario tests (which share one container) don't
/// interleave truncation with another test's assertions.
pub async fn fresh_pool() -> (PgPool, tokio::sync::MutexGuard<'static, ()>) {
    let guard = TEST_LOCK.lock().await;
    let infra = SharedInfra::get().await;
    let pool = PgPool::connect(&infra.db_url)
        .await
        .expect("failed to connect test pool");

    sqlx::query(
        "TRUNCATE TABLE archived_intentions, arch_jobs, intention_previous, intentions,
                        token_jobs, tokens, scheduled_intentions, repos, jobs, workers
         RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .expect("failed to truncate tables between tests");

    (pool, guard)
}
