//! Repo — per-kind target descriptor (spec §3). One tagged-variant table
//! with source-specific nullable columns, unique-indexed per source in the
//! migration (partial unique indexes, since only one source's columns are
//! populated per row).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "intention_source", rename_all = "lowercase")]
pub enum Source {
    Git,
    GitHub,
    GitLab,
    Meetup,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub id: Uuid,
    pub source: Source,
    pub url: Option<String>,
    pub owner: Option<String>,
    pub name: Option<String>,
    pub instance: Option<String>,
    pub group_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Repo {
    pub async fn get_or_create_git(url: &str, db: &sqlx::PgPool) -> sqlx::Result<Self> {
        Self::get_or_create(
            "SELECT id, source, url, owner, name, instance, group_name, created_at
             FROM repos WHERE source = 'git' AND url = $1",
            "INSERT INTO repos (id, source, url) VALUES ($1, 'git', $2)
             ON CONFLICT DO NOTHING
             RETURNING id, source, url, owner, name, instance, group_name, created_at",
            url,
            db,
        )
        .await
    }

    pub async fn get_or_create_github(
        owner: &str,
        name: &str,
        instance: &str,
        db: &sqlx::PgPool,
    ) -> sqlx::Result<Self> {
        Self::get_or_create_owned_triple("github", owner, name, instance, db).await
    }

    pub async fn get_or_create_gitlab(
        owner: &str,
        name: &str,
        instance: &str,
        db: &sqlx::PgPool,
    ) -> sqlx::Result<Self> {
        Self::get_or_create_owned_triple("gitlab", owner, name, instance, db).await
    }

    async fn get_or_create_owned_triple(
        source: &str,
        owner: &str,
        name: &str,
        instance: &str,
        db: &sqlx::PgPool,
    ) -> sqlx::Result<Self> {
        if let Some(existing) = sqlx::query_as::<_, Self>(
            "SELECT id, source, url, owner, name, instance, group_name, created_at
             FROM repos WHERE source = $1::intention_source AND owner = $2 AND name = $3 AND instance = $4",
        )
        .bind(source)
        .bind(owner)
        .bind(name)
        .bind(instance)
        .fetch_optional(db)
        .await?
        {
            return Ok(existing);
        }

        let inserted = sqlx::query_as::<_, Self>(
            "INSERT INTO repos (id, source, owner, name, instance) VALUES ($1, $2::intention_source, $3, $4, $5)
             ON CONFLICT DO NOTHING
             RETURNING id, source, url, owner, name, instance, group_name, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(source)
        .bind(owner)
        .bind(name)
        .bind(instance)
        .fetch_optional(db)
        .await?;

        if let Some(row) = inserted {
            return Ok(row);
        }

        sqlx::query_as::<_, Self>(
            "SELECT id, source, url, owner, name, instance, group_name, created_at
             FROM repos WHERE source = $1::intention_source AND owner = $2 AND name = $3 AND instance = $4",
        )
        .bind(source)
        .bind(owner)
        .bind(name)
        .bind(instance)
        .fetch_one(db)
        .await
    }

    pub async fn get_or_create_meetup(group: &str, db: &sqlx::PgPool) -> sqlx::Result<Self> {
        Self::get_or_create(
            "SELECT id, source, url, owner, name, instance, group_name, created_at
             FROM repos WHERE source = 'meetup' AND group_name = $1",
            "INSERT INTO repos (id, source, group_name) VALUES ($1, 'meetup', $2)
             ON CONFLICT DO NOTHING
             RETURNING id, source, url, owner, name, instance, group_name, created_at",
            group,
            db,
        )
        .await
    }

    async fn get_or_create(
        select_sql: &str,
        insert_sql: &str,
        key: &str,
        db: &sqlx::PgPool,
    ) -> sqlx::Result<Self> {
        if let Some(existing) = sqlx::query_as::<_, Self>(select_sql)
            .bind(key)
            .fetch_optional(db)
            .await?
        {
            return Ok(existing);
        }

        let inserted = sqlx::query_as::<_, Self>(insert_sql)
            .bind(Uuid::new_v4())
            .bind(key)
            .fetch_optional(db)
            .await?;

        if let Some(row) = inserted {
            return Ok(row);
        }

        sqlx::query_as::<_, Self>(select_sql)
            .bind(key)
            .fetch_one(db)
            .await
    }
}
