//! `SchedWorker` — the run loop (spec §4.2).
//!
//! Grounded on the teacher's `kernel/jobs/worker.rs::JobWorker` shape (poll
//! → claim → execute → mark outcome), adapted to the
//! resume/admit/coalesce/execute/archive sequence spec §4.2 names instead of
//! a generic command dispatcher.

use rand::seq::SliceRandom;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::SchedulerError;
use crate::kinds;
use crate::model::{ArchJob, ArchivedStatus, Intention, IntentionKindId, Job, Worker};
use crate::periodic;
use crate::runner::{RunOutcome, TaskRunner};

pub struct SchedWorker {
    pub worker: Worker,
    db: PgPool,
    config: Config,
    runner: std::sync::Arc<dyn TaskRunner>,
}

/// Outcome of one admission/resumption attempt, carrying the intentions
/// bound to the acquired job so the caller knows what to archive.
struct AcquiredJob {
    job: Job,
    /// true if this worker now owns the job and should execute it; false
    /// when the intention coalesced onto work another worker is running.
    owned_by_us: bool,
}

impl SchedWorker {
    pub async fn new(
        db: PgPool,
        config: Config,
        runner: std::sync::Arc<dyn TaskRunner>,
    ) -> Result<Self, SchedulerError> {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
        let worker = Worker::register(&hostname, &db).await?;
        info!(worker_id = %worker.id, hostname = %hostname, "registered scheduler worker");
        Ok(Self {
            worker,
            db,
            config,
            runner,
        })
    }

    /// Run forever (or until `finish` and the system has gone idle once).
    pub async fn run(&self) -> Result<(), SchedulerError> {
        loop {
            let ran_something = self.tick().await?;
            if !ran_something && self.config.finish {
                let claimed = Job::count_claimed(&self.db).await?;
                if claimed == 0 {
                    info!("no claimed jobs and admit step returned nothing; exiting");
                    return Ok(());
                }
            }
            if !ran_something {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }

    /// One iteration of the loop described in spec §4.2. Returns whether a
    /// job was executed this tick.
    pub async fn tick(&self) -> Result<bool, SchedulerError> {
        // 1. Materialize any due ScheduledIntentions.
        if let Err(e) = periodic::materialize_due(self.worker.id, &self.db).await {
            error!(error = %e, "periodic materialization failed");
        }

        // 2/3. Resume, then admit new.
        let acquired = match self.resume().await? {
            Some(acquired) => Some(acquired),
            None => self.admit_new().await?,
        };

        let Some(acquired) = acquired else {
            return Ok(false);
        };

        if !acquired.owned_by_us {
            // Coalesced onto work another worker owns; nothing to execute.
            return Ok(true);
        }

        self.execute(acquired.job).await?;
        Ok(true)
    }

    /// Step 2: for each kind in priority order, try `next_job`.
    ///
    /// `next_job` claims with `SKIP LOCKED`, not `NOWAIT`, so it never
    /// returns `Contention` — a locked candidate is silently skipped in
    /// favor of the next unlocked one rather than erroring.
    async fn resume(&self) -> Result<Option<AcquiredJob>, SchedulerError> {
        for kind in IntentionKindId::PRIORITY {
            match kinds::next_job(kind, self.worker.id, &self.db).await {
                Ok(Some(job)) => {
                    return Ok(Some(AcquiredJob {
                        job,
                        owned_by_us: true,
                    }));
                }
                Ok(None) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Step 3: admit new work, gated by the global claimed-job cap
    /// (`< 5 * worker_count`, spec §4.2) to stop one worker hoarding.
    async fn admit_new(&self) -> Result<Option<AcquiredJob>, SchedulerError> {
        let worker_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workers")
            .fetch_one(&self.db)
            .await?;
        let claimed = Job::count_claimed(&self.db).await?;
        if claimed >= 5 * worker_count.max(1) {
            return Ok(None);
        }

        let mut user_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM intentions WHERE job_id IS NULL",
        )
        .fetch_all(&self.db)
        .await?;
        user_ids.shuffle(&mut rand::thread_rng());
        user_ids.truncate(self.config.max_users as usize);

        for user_id in user_ids {
            let mut candidates = Vec::new();
            for kind in IntentionKindId::PRIORITY {
                let found = kinds::selectable(kind, user_id, self.config.max_intentions, &self.db)
                    .await?;
                candidates.extend(found);
                if candidates.len() as i64 >= self.config.max_intentions {
                    break;
                }
            }
            candidates.truncate(self.config.max_intentions as usize);

            for intention in candidates {
                if let Some(job) = kinds::running_job(&intention, &self.db).await? {
                    // Coalesced onto an in-flight job owned by another worker.
                    return Ok(Some(AcquiredJob {
                        job,
                        owned_by_us: false,
                    }));
                }

                match kinds::create_job(&intention, self.worker.id, &self.db).await {
                    Ok(Some(job)) => {
                        return Ok(Some(AcquiredJob {
                            job,
                            owned_by_us: true,
                        }));
                    }
                    Ok(None) => continue,
                    Err(SchedulerError::Contention) => continue,
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(None)
    }

    /// Steps 4/5: execute the bound intentions, then archive or release
    /// depending on the runner's outcome.
    async fn execute(&self, job: Job) -> Result<(), SchedulerError> {
        let intentions = sqlx::query_as::<_, Intention>(
            "SELECT id, kind, user_id, repo_id, created_at, job_id FROM intentions WHERE job_id = $1",
        )
        .bind(job.id)
        .fetch_all(&self.db)
        .await?;

        let Some(first) = intentions.first() else {
            warn!(job_id = %job.id, "acquired job with no bound intentions; archiving empty");
            let mut tx = self.db.begin().await?;
            ArchJob::from_job(&job, &mut tx).await?;
            tx.commit().await?;
            return Ok(());
        };

        let repo = sqlx::query_as::<_, crate::model::Repo>(
            "SELECT id, source, url, owner, name, instance, group_name, created_at FROM repos WHERE id = $1",
        )
        .bind(first.repo_id)
        .fetch_one(&self.db)
        .await?;

        let outcome = kinds::run(first, &job, &repo, self.runner.as_ref(), &self.db).await;

        match outcome {
            Ok(RunOutcome::Completed) => {
                self.archive_all(&job, &intentions, ArchivedStatus::Ok).await
            }
            Ok(RunOutcome::Suspended {
                minutes_until_reset,
            }) => {
                if let Some(token_kind) = first.kind.token_kind() {
                    if let Some(token) =
                        crate::model::Token::first_ready_attached(job.id, &self.db).await?
                    {
                        token.stamp_reset(minutes_until_reset, &self.db).await?;
                    } else {
                        warn!(job_id = %job.id, ?token_kind, "suspended run with no attached token to stamp");
                    }
                }
                Job::release(job.id, &self.db).await?;
                Ok(())
            }
            Ok(RunOutcome::Failed { message }) => {
                error!(job_id = %job.id, error = %message, "task runner failed");
                self.archive_all(&job, &intentions, ArchivedStatus::Error).await
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "task runner errored");
                self.archive_all(&job, &intentions, ArchivedStatus::Error).await
            }
        }
    }

    async fn archive_all(
        &self,
        job: &Job,
        intentions: &[Intention],
        status: ArchivedStatus,
    ) -> Result<(), SchedulerError> {
        // Archive the job first, but don't delete its row until every
        // intention pointing at it has been archived (and thus deleted):
        // intentions.job_id has no ON DELETE CASCADE.
        let mut tx = self.db.begin().await?;
        let arch_job = ArchJob::record_only(job, &mut tx).await?;
        for intention in intentions {
            kinds::archive(intention, status, arch_job.id, &mut tx).await?;
        }
        ArchJob::delete_job(job.id, &mut tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
