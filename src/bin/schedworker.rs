//! `schedworker` — starts a `SchedWorker` with `run = true` (spec §6). No
//! flags are part of this spec; everything is read from the environment by
//! `Config::from_env`.

use anyhow::{Context, Result};
use schedcore::{Config, SchedWorker};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,schedcore=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting schedworker");

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let runner = std::sync::Arc::new(NoopRunner);
    let worker = SchedWorker::new(pool, config, runner)
        .await
        .context("failed to register worker")?;

    worker.run().await.context("scheduler loop failed")?;

    Ok(())
}

/// Placeholder `TaskRunner`: the real Git/GitHub/GitLab/Meetup runners are
/// external collaborators named by interface only (spec §1). A deployment
/// wires in its own `TaskRunner` implementation; this binary exists to
/// demonstrate the wiring, not to gather data itself.
struct NoopRunner;

#[async_trait::async_trait]
impl schedcore::runner::TaskRunner for NoopRunner {
    async fn run(
        &self,
        _input: schedcore::runner::RunnerInput,
    ) -> Result<schedcore::runner::RunOutcome, schedcore::SchedulerError> {
        Ok(schedcore::runner::RunOutcome::Completed)
    }
}
