//! Intention model — a user's desire to reach a state for a target (spec §3).
//!
//! Modeled as a single tagged-variant table rather than one sibling table
//! per kind (spec §9 explicitly allows either; the tagged form keeps eight
//! near-identical subclasses from being written out by hand).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::model::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "intention_kind")]
pub enum IntentionKindId {
    #[sqlx(rename = "git_raw")]
    GitRaw,
    #[sqlx(rename = "git_enrich")]
    GitEnrich,
    #[sqlx(rename = "github_raw")]
    GitHubRaw,
    #[sqlx(rename = "github_enrich")]
    GitHubEnrich,
    #[sqlx(rename = "gitlab_raw")]
    GitLabRaw,
    #[sqlx(rename = "gitlab_enrich")]
    GitLabEnrich,
    #[sqlx(rename = "meetup_raw")]
    MeetupRaw,
    #[sqlx(rename = "meetup_enrich")]
    MeetupEnrich,
}

impl IntentionKindId {
    /// Dispatcher/resumption priority order, enrich before raw (spec §4.1).
    pub const PRIORITY: [IntentionKindId; 8] = [
        IntentionKindId::GitHubEnrich,
        IntentionKindId::GitLabEnrich,
        IntentionKindId::GitEnrich,
        IntentionKindId::MeetupEnrich,
        IntentionKindId::GitHubRaw,
        IntentionKindId::GitLabRaw,
        IntentionKindId::GitRaw,
        IntentionKindId::MeetupRaw,
    ];

    pub fn is_enrich(self) -> bool {
        matches!(
            self,
            IntentionKindId::GitEnrich
                | IntentionKindId::GitHubEnrich
                | IntentionKindId::GitLabEnrich
                | IntentionKindId::MeetupEnrich
        )
    }

    pub fn source(self) -> Source {
        match self {
            IntentionKindId::GitRaw | IntentionKindId::GitEnrich => Source::Git,
            IntentionKindId::GitHubRaw | IntentionKindId::GitHubEnrich => Source::GitHub,
            IntentionKindId::GitLabRaw | IntentionKindId::GitLabEnrich => Source::GitLab,
            IntentionKindId::MeetupRaw | IntentionKindId::MeetupEnrich => Source::Meetup,
        }
    }

    /// The raw kind that must precede this enrich kind (spec §4.1 `create_previous`).
    /// Returns `None` for raw kinds.
    pub fn raw_counterpart(self) -> Option<IntentionKindId> {
        match self {
            IntentionKindId::GitEnrich => Some(IntentionKindId::GitRaw),
            IntentionKindId::GitHubEnrich => Some(IntentionKindId::GitHubRaw),
            IntentionKindId::GitLabEnrich => Some(IntentionKindId::GitLabRaw),
            IntentionKindId::MeetupEnrich => Some(IntentionKindId::MeetupRaw),
            _ => None,
        }
    }

    /// Token kind this intention's admission/execution is gated on, or
    /// `None` for Git (ungated per spec §1/§4.3).
    pub fn token_kind(self) -> Option<crate::model::TokenKind> {
        match self.source() {
            Source::Git => None,
            Source::GitHub => Some(crate::model::TokenKind::GitHub),
            Source::GitLab => Some(crate::model::TokenKind::GitLab),
            Source::Meetup => Some(crate::model::TokenKind::Meetup),
        }
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Intention {
    pub id: Uuid,
    pub kind: IntentionKindId,
    pub user_id: Uuid,
    pub repo_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub job_id: Option<Uuid>,
}

impl Intention {
    /// Get-or-create an intention for `(user, repo, kind)` (spec §6 get-or-create
    /// semantics reused by `create_previous` and the creation API).
    pub async fn get_or_create(
        kind: IntentionKindId,
        user_id: Uuid,
        repo_id: Uuid,
        db: &sqlx::PgPool,
    ) -> sqlx::Result<Self> {
        if let Some(existing) = sqlx::query_as::<_, Self>(
            "SELECT id, kind, user_id, repo_id, created_at, job_id FROM intentions
             WHERE kind = $1 AND user_id = $2 AND repo_id = $3",
        )
        .bind(kind)
        .bind(user_id)
        .bind(repo_id)
        .fetch_optional(db)
        .await?
        {
            return Ok(existing);
        }

        // Racing against another get_or_create is handled by the unique
        // index below plus a re-read on conflict (spec §7 SchemaIntegrity).
        let inserted = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO intentions (id, kind, user_id, repo_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            RETURNING id, kind, user_id, repo_id, created_at, job_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(kind)
        .bind(user_id)
        .bind(repo_id)
        .fetch_optional(db)
        .await?;

        if let Some(row) = inserted {
            return Ok(row);
        }

        sqlx::query_as::<_, Self>(
            "SELECT id, kind, user_id, repo_id, created_at, job_id FROM intentions
             WHERE kind = $1 AND user_id = $2 AND repo_id = $3",
        )
        .bind(kind)
        .bind(user_id)
        .bind(repo_id)
        .fetch_one(db)
        .await
    }

    pub async fn append_previous(
        &self,
        previous_id: Uuid,
        db: &sqlx::PgPool,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO intention_previous (intention_id, previous_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(self.id)
        .bind(previous_id)
        .execute(db)
        .await?;
        Ok(())
    }

    /// An intention is ready iff its `previous` set is empty (spec §3 invariant 1).
    pub async fn is_ready(id: Uuid, db: &sqlx::PgPool) -> sqlx::Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM intention_previous WHERE intention_id = $1")
                .bind(id)
                .fetch_one(db)
                .await?;
        Ok(count == 0)
    }

    /// Bind this intention to `job_id` (admission or coalescing), but only if
    /// it is still unbound. Returns the number of rows changed: 0 means
    /// another worker beat us to it.
    pub async fn bind_job<'e, E>(&self, job_id: Uuid, db: E) -> sqlx::Result<u64>
    where
        E: sqlx::PgExecutor<'e>,
    {
        Ok(
            sqlx::query("UPDATE intentions SET job_id = $1 WHERE id = $2 AND job_id IS NULL")
                .bind(job_id)
                .bind(self.id)
                .execute(db)
                .await?
                .rows_affected(),
        )
    }

    pub async fn delete(id: Uuid, db: &sqlx::PgPool) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM intentions WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrich_kinds_precede_raw_kinds_in_priority() {
        let enrich_positions: Vec<usize> = IntentionKindId::PRIORITY
            .iter()
            .enumerate()
            .filter(|(_, k)| k.is_enrich())
            .map(|(i, _)| i)
            .collect();
        let raw_positions: Vec<usize> = IntentionKindId::PRIORITY
            .iter()
            .enumerate()
            .filter(|(_, k)| !k.is_enrich())
            .map(|(i, _)| i)
            .collect();
        assert!(enrich_positions.iter().max() < raw_positions.iter().min());
    }

    #[test]
    fn raw_counterpart_round_trips_for_every_enrich_kind() {
        for kind in IntentionKindId::PRIORITY {
            if kind.is_enrich() {
                let raw = kind.raw_counterpart().expect("enrich kind must name a raw counterpart");
                assert!(!raw.is_enrich());
                assert_eq!(raw.source(), kind.source());
            } else {
                assert!(kind.raw_counterpart().is_none());
            }
        }
    }

    #[test]
    fn git_kind_has_no_token_kind() {
        assert!(IntentionKindId::GitRaw.token_kind().is_none());
        assert!(IntentionKindId::GitEnrich.token_kind().is_none());
    }

    #[test]
    fn token_gated_kinds_match_their_source() {
        assert_eq!(
            IntentionKindId::GitHubRaw.token_kind(),
            Some(crate::model::TokenKind::GitHub)
        );
        assert_eq!(
            IntentionKindId::GitLabEnrich.token_kind(),
            Some(crate::model::TokenKind::GitLab)
        );
        assert_eq!(
            IntentionKindId::MeetupRaw.token_kind(),
            Some(crate::model::TokenKind::Meetup)
        );
    }
}
