//! Intention-creation API (spec §6), called by an external HTTP layer that
//! is itself out of scope (spec §1).

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::kinds;
use crate::model::{IntentionKindId, Repo, Source, TokenKind};

/// get-or-create `GitRepo(url)`, get-or-create raw+enrich intentions, chain
/// raw into enrich's `previous` (spec §6).
pub async fn analyze_git_repo(user_id: Uuid, url: &str, db: &PgPool) -> Result<Repo, SchedulerError> {
    let repo = Repo::get_or_create_git(url, db).await?;
    chain_raw_and_enrich(user_id, repo.id, IntentionKindId::GitEnrich, db).await?;
    Ok(repo)
}

/// Requires the user to own >=1 GitHub token; returns `None` otherwise
/// (spec §6).
pub async fn analyze_github_repo(
    user_id: Uuid,
    owner: &str,
    repo_name: &str,
    db: &PgPool,
) -> Result<Option<Repo>, SchedulerError> {
    analyze_token_gated(
        user_id,
        owner,
        repo_name,
        "github",
        TokenKind::GitHub,
        Source::GitHub,
        IntentionKindId::GitHubEnrich,
        db,
    )
    .await
}

/// Analogous to GitHub (spec §6).
pub async fn analyze_gitlab_repo(
    user_id: Uuid,
    owner: &str,
    repo_name: &str,
    instance: &str,
    db: &PgPool,
) -> Result<Option<Repo>, SchedulerError> {
    analyze_token_gated(
        user_id,
        owner,
        repo_name,
        instance,
        TokenKind::GitLab,
        Source::GitLab,
        IntentionKindId::GitLabEnrich,
        db,
    )
    .await
}

/// Analogous to GitHub/GitLab, keyed by Meetup group instead of owner/repo
/// (spec §6).
pub async fn analyze_meetup_group(
    user_id: Uuid,
    group: &str,
    db: &PgPool,
) -> Result<Option<Repo>, SchedulerError> {
    if !user_owns_any_token(user_id, TokenKind::Meetup, db).await? {
        return Ok(None);
    }

    let repo = Repo::get_or_create_meetup(group, db).await?;
    chain_raw_and_enrich(user_id, repo.id, IntentionKindId::MeetupEnrich, db).await?;
    Ok(Some(repo))
}

#[allow(clippy::too_many_arguments)]
async fn analyze_token_gated(
    user_id: Uuid,
    owner: &str,
    repo_name: &str,
    instance: &str,
    token_kind: TokenKind,
    source: Source,
    enrich_kind: IntentionKindId,
    db: &PgPool,
) -> Result<Option<Repo>, SchedulerError> {
    if !user_owns_any_token(user_id, token_kind, db).await? {
        return Ok(None);
    }

    let repo = match source {
        Source::GitHub => Repo::get_or_create_github(owner, repo_name, instance, db).await?,
        Source::GitLab => Repo::get_or_create_gitlab(owner, repo_name, instance, db).await?,
        _ => unreachable!("analyze_token_gated only used for GitHub/GitLab"),
    };

    chain_raw_and_enrich(user_id, repo.id, enrich_kind, db).await?;
    Ok(Some(repo))
}

/// The API's gate is ownership of *any* token of the kind, not a ready one —
/// `selectable` (spec §4.1) is what later requires readiness for admission.
async fn user_owns_any_token(user_id: Uuid, kind: TokenKind, db: &PgPool) -> Result<bool, SchedulerError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tokens WHERE user_id = $1 AND kind = $2")
        .bind(user_id)
        .bind(kind)
        .fetch_one(db)
        .await?;
    Ok(count > 0)
}

/// get-or-create the enrich intention, then chain its raw counterpart in via
/// `create_previous` (which derives the raw kind itself from
/// `enrich_kind.raw_counterpart()`, so callers never hand in a raw kind that
/// could drift from the enrich kind they also passed).
async fn chain_raw_and_enrich(
    user_id: Uuid,
    repo_id: Uuid,
    enrich_kind: IntentionKindId,
    db: &PgPool,
) -> Result<(), SchedulerError> {
    let enrich = crate::model::Intention::get_or_create(enrich_kind, user_id, repo_id, db).await?;
    kinds::create_previous(&enrich, db).await?;
    Ok(())
}
