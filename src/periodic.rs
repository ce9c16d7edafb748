//! Periodic intention generator (spec §4.4).
//!
//! Grounded on the teacher's `kernel/scheduled_tasks.rs` shape (find due
//! rows → act → log), but replacing `tokio_cron_scheduler`'s wall-clock cron
//! triggers with the spec's claimed-row materializer: a bulk
//! `scheduled_at <= now AND worker IS NULL` claim, one row at a time,
//! instantiated and released at the end regardless of success.

use std::future::Future;
use std::pin::Pin;

use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::model::{Intention, Repo, ScheduledIntention, Source};

/// Materialize every `ScheduledIntention` due now, claimed by `worker_id`.
/// Each row's failure is logged and does not abort the batch (spec §4.4,
/// §7 `PeriodicInstantiationError`).
pub async fn materialize_due(worker_id: Uuid, db: &PgPool) -> Result<(), SchedulerError> {
    let due = ScheduledIntention::claim_due(worker_id, db).await?;
    for row in due {
        if let Err(e) = instantiate_tree(&row, None, db).await {
            error!(scheduled_intention_id = %row.id, error = %e, "failed to instantiate scheduled intention");
        }
        if let Err(e) = row.advance_and_release(db).await {
            error!(scheduled_intention_id = %row.id, error = %e, "failed to advance/release scheduled intention");
        }
    }
    Ok(())
}

/// Instantiate `row` (appending to `parent`'s `previous` if this is a
/// dependent row) and recurse into its children with the new intention as
/// their parent (spec §4.4). Boxed by hand since `async fn` can't recurse.
fn instantiate_tree<'a>(
    row: &'a ScheduledIntention,
    parent: Option<&'a Intention>,
    db: &'a PgPool,
) -> Pin<Box<dyn Future<Output = Result<(), SchedulerError>> + Send + 'a>> {
    Box::pin(async move {
        let repo = resolve_repo(row, db).await?;
        let intention =
            Intention::get_or_create(row.intention_kind, row.user_id, repo.id, db).await?;

        if let Some(parent) = parent {
            parent.append_previous(intention.id, db).await?;
        }

        for child in row.children(db).await? {
            instantiate_tree(&child, Some(&intention), db).await?;
        }

        info!(scheduled_intention_id = %row.id, intention_id = %intention.id, "materialized scheduled intention");
        Ok(())
    })
}

/// Resolve the target `Repo` from the row's structured `kwargs` document
/// (spec §9: "`kwargs` stores a structured argument document").
async fn resolve_repo(row: &ScheduledIntention, db: &PgPool) -> Result<Repo, SchedulerError> {
    let source = row.intention_kind.source();
    let repo = match source {
        Source::Git => {
            let url = row.kwargs["url"]
                .as_str()
                .ok_or(SchedulerError::SchemaIntegrity("scheduled_intention.kwargs.url"))?;
            Repo::get_or_create_git(url, db).await?
        }
        Source::GitHub | Source::GitLab => {
            let owner = row.kwargs["owner"]
                .as_str()
                .ok_or(SchedulerError::SchemaIntegrity("scheduled_intention.kwargs.owner"))?;
            let name = row.kwargs["repo"]
                .as_str()
                .ok_or(SchedulerError::SchemaIntegrity("scheduled_intention.kwargs.repo"))?;
            let instance = row.kwargs["instance"].as_str().unwrap_or("default");
            if source == Source::GitHub {
                Repo::get_or_create_github(owner, name, instance, db).await?
            } else {
                Repo::get_or_create_gitlab(owner, name, instance, db).await?
            }
        }
        Source::Meetup => {
            let group = row.kwargs["group"]
                .as_str()
                .ok_or(SchedulerError::SchemaIntegrity("scheduled_intention.kwargs.group"))?;
            Repo::get_or_create_meetup(group, db).await?
        }
    };
    Ok(repo)
}
