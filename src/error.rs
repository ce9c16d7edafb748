//! Error taxonomy for the scheduling subsystem. See spec §7.

use thiserror::Error;
use uuid::Uuid;

/// Recoverable and terminal error classes the dispatcher reacts to.
///
/// Every variant maps to a specific recovery path in [`crate::dispatcher`];
/// this is not a generic catch-all, so don't add a variant without wiring
/// its recovery behavior.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A row lock could not be acquired (`FOR UPDATE SKIP LOCKED` found
    /// nothing, or a concurrent writer held the row). Recovery: abandon this
    /// candidate and keep iterating.
    #[error("row lock unavailable")]
    Contention,

    /// `create_job` lost the race: another worker already bound a job to
    /// this intention. Recovery: treat as if `create_job` returned `None`.
    #[error("intention {0} already admitted by another worker")]
    AlreadyAdmitted(Uuid),

    /// Every owned token for this kind is over its concurrency cap or in
    /// cool-down. Recovery: set `reset_at`, release the job without archiving.
    #[error("no ready token available for kind")]
    TokenExhausted,

    /// The task runner returned a non-recoverable outcome.
    #[error("runner failed: {0}")]
    RunnerFailure(String),

    /// Instantiating one `ScheduledIntention` row failed; the batch keeps
    /// going and the row is released for the next tick.
    #[error("failed to instantiate scheduled intention {0}: {1}")]
    PeriodicInstantiationError(Uuid, String),

    /// A `get_or_create` hit a unique constraint; the existing row should be
    /// re-read instead of propagating the error.
    #[error("integrity violation on {0}")]
    SchemaIntegrity(&'static str),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl SchedulerError {
    /// Classify a query error from a `FOR UPDATE NOWAIT` lock attempt:
    /// Postgres `lock_not_available` (55P03, what `NOWAIT` raises when the
    /// row is already locked) becomes `Contention`; anything else is a
    /// genuine database error.
    pub fn from_lock_attempt(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some("55P03") {
                return SchedulerError::Contention;
            }
        }
        SchedulerError::Db(err)
    }
}
