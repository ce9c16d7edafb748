//! Intention-kind registry: the seven operations of spec §4.1, dispatched by
//! a `match` on [`IntentionKindId`] rather than reflection (spec §9 design
//! note: "replace reflective `import_module + getattr` with a static
//! registry mapping kind identifiers to constructors" — here the identifier
//! *is* the registry key).

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::model::{Intention, IntentionKindId, Job, Token};
use crate::runner::{RunOutcome, TaskRunner};

/// Up to `max` intentions owned by `user` that are admissible now (spec §4.1).
///
/// Base filter: no bound job AND previous-set empty. Token-backed kinds
/// additionally require a ready, uncapped token; if none exists the result
/// is empty without even querying intentions (spec §4.1 "without querying
/// intentions").
pub async fn selectable(
    kind: IntentionKindId,
    user_id: Uuid,
    max: i64,
    db: &PgPool,
) -> Result<Vec<Intention>, SchedulerError> {
    if let Some(token_kind) = kind.token_kind() {
        if !Token::has_ready_for_user(user_id, token_kind, db).await? {
            return Ok(Vec::new());
        }
    }

    let rows = sqlx::query_as::<_, Intention>(
        r#"
        SELECT i.id, i.kind, i.user_id, i.repo_id, i.created_at, i.job_id
        FROM intentions i
        WHERE i.kind = $1 AND i.user_id = $2 AND i.job_id IS NULL
          AND NOT EXISTS (SELECT 1 FROM intention_previous p WHERE p.intention_id = i.id)
        LIMIT $3
        "#,
    )
    .bind(kind)
    .bind(user_id)
    .bind(max)
    .fetch_all(db)
    .await?;

    Ok(rows)
}

/// For enrich kinds, locate-or-create the corresponding raw intention for the
/// same `(user, repo)` and append it to `self.previous`. Raw kinds return
/// nothing (spec §4.1).
///
/// Bounded retry per spec §9: the teacher's back-to-back raw+enrich
/// construction hits a transient store-internal error in practice; we retry
/// get_or_create a few times before giving up, rather than looping forever.
pub async fn create_previous(intention: &Intention, db: &PgPool) -> Result<(), SchedulerError> {
    let Some(raw_kind) = intention.kind.raw_counterpart() else {
        return Ok(());
    };

    const MAX_ATTEMPTS: u32 = 5;
    let mut last_err = None;
    for _ in 0..MAX_ATTEMPTS {
        match Intention::get_or_create(raw_kind, intention.user_id, intention.repo_id, db).await {
            Ok(raw) => {
                intention.append_previous(raw.id, db).await?;
                return Ok(());
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.expect("loop runs at least once").into())
}

/// Find a sibling intention of the same kind/repo with a job already bound,
/// and coalesce onto it (spec §4.1 `running_job`).
///
/// Token-backed kinds additionally attach the current user's eligible
/// tokens to the shared job; if none could be attached, the coalesce is
/// refused (returns `None`) so the caller falls through to `create_job`.
pub async fn running_job(
    intention: &Intention,
    db: &PgPool,
) -> Result<Option<Job>, SchedulerError> {
    let Some(sibling_job_id) = sqlx::query_scalar::<_, Uuid>(
        "SELECT job_id FROM intentions
         WHERE kind = $1 AND repo_id = $2 AND job_id IS NOT NULL AND id != $3
         LIMIT 1",
    )
    .bind(intention.kind)
    .bind(intention.repo_id)
    .bind(intention.id)
    .fetch_optional(db)
    .await?
    else {
        return Ok(None);
    };

    if let Some(token_kind) = intention.kind.token_kind() {
        let mut tx = db.begin().await?;
        let tokens = Token::eligible_for_user(intention.user_id, token_kind, &mut tx).await?;
        if tokens.is_empty() {
            tx.rollback().await?;
            return Ok(None);
        }
        for token in &tokens {
            token.attach(sibling_job_id, &mut tx).await?;
        }
        intention.bind_job(sibling_job_id, &mut *tx).await?;
        tx.commit().await?;
    } else {
        intention.bind_job(sibling_job_id, db).await?;
    }

    let job = sqlx::query_as::<_, Job>(
        "SELECT id, created_at, worker_id, claimed_at, log_location FROM jobs WHERE id = $1",
    )
    .bind(sibling_job_id)
    .fetch_one(db)
    .await?;
    Ok(Some(job))
}

/// Admission path: create a new job reserving a token if needed (spec §4.1
/// `create_job`). Returns `None` if admission lost the race (the intention
/// got bound concurrently) or if a token-backed kind has no eligible token.
pub async fn create_job(
    intention: &Intention,
    worker_id: Uuid,
    db: &PgPool,
) -> Result<Option<Job>, SchedulerError> {
    let mut tx = db.begin().await?;

    // Re-check under the transaction: another worker may have admitted this
    // intention since `selectable` ran. NOWAIT so a concurrently-racing
    // worker surfaces as Contention (spec §4.2/§7) instead of blocking.
    let still_unbound: bool = sqlx::query_scalar(
        "SELECT job_id IS NULL FROM intentions WHERE id = $1 FOR UPDATE NOWAIT",
    )
    .bind(intention.id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(SchedulerError::from_lock_attempt)?
    .unwrap_or(false);

    if !still_unbound {
        tx.rollback().await?;
        return Ok(None);
    }

    let tokens = if let Some(token_kind) = intention.kind.token_kind() {
        let eligible = Token::eligible_for_user(intention.user_id, token_kind, &mut tx).await?;
        if eligible.is_empty() {
            tx.rollback().await?;
            return Ok(None);
        }
        eligible
    } else {
        Vec::new()
    };

    let job = sqlx::query_as::<_, Job>(
        "INSERT INTO jobs (id, worker_id, claimed_at) VALUES ($1, $2, NOW())
         RETURNING id, created_at, worker_id, claimed_at, log_location",
    )
    .bind(Uuid::new_v4())
    .bind(worker_id)
    .fetch_one(&mut *tx)
    .await?;

    for token in &tokens {
        token.attach(job.id, &mut tx).await?;
    }

    let changed = intention.bind_job(job.id, &mut *tx).await?;
    if changed == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    tx.commit().await?;
    Ok(Some(job))
}

/// Resumption path: atomically claim a job with `worker = null` bound to an
/// intention of `kind` whose attached tokens are all ready (spec §4.1 `next_job`).
pub async fn next_job(
    kind: IntentionKindId,
    worker_id: Uuid,
    db: &PgPool,
) -> Result<Option<Job>, SchedulerError> {
    Ok(Job::claim_next_resumable(kind, worker_id, db).await?)
}

/// Delegate to the external `TaskRunner` for this kind (spec §4.1 `run`).
pub async fn run(
    intention: &Intention,
    job: &Job,
    repo: &crate::model::Repo,
    runner: &dyn TaskRunner,
    db: &PgPool,
) -> Result<RunOutcome, SchedulerError> {
    let token_secret = if intention.kind.token_kind().is_some() {
        Token::first_ready_attached(job.id, db).await?.map(|t| t.secret)
    } else {
        None
    };

    let input = crate::runner::RunnerInput {
        kind: intention.kind,
        repo: repo.clone(),
        token_secret,
    };
    runner.run(input).await
}

/// Insert an `ArchivedIntention` row and delete the live intention (spec §4.1 `archive`).
pub async fn archive(
    intention: &Intention,
    status: crate::model::ArchivedStatus,
    arch_job_id: Uuid,
    db: &mut sqlx::PgConnection,
) -> Result<(), SchedulerError> {
    crate::model::ArchivedIntention::record(intention, status, arch_job_id, db).await?;
    Ok(())
}
