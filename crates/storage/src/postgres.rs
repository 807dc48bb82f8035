//! PostgreSQL stores over a shared sqlx pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use intake_core::config::PostgresConfig;
use intake_core::{Job, JobId, JobStatus, NewRepo, Repo};

use crate::error::StoreError;
use crate::traits::{JobStore, RepoStore};

/// Connect to PostgreSQL and apply pending migrations.
pub async fn init_pg_pool(config: &PostgresConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url())
        .await?;
    info!(host = %config.host, database = %config.database, "PostgreSQL connected");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Database(e.into()))?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    file_path: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        Ok(Job {
            id: JobId(row.id),
            file_path: row.file_path,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, file_path: &str) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            "INSERT INTO jobs (file_path, status)
             VALUES ($1, 'pending')
             RETURNING id, file_path, status, created_at, updated_at",
        )
        .bind(file_path)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock so two workers cannot both pass the transition check.
        let current: Job = sqlx::query_as::<_, JobRow>(
            "SELECT id, file_path, status, created_at, updated_at
             FROM jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?
        .try_into()?;

        if !current.status.can_advance_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }

        let row = sqlx::query_as::<_, JobRow>(
            "UPDATE jobs SET status = $2, updated_at = now()
             WHERE id = $1
             RETURNING id, file_path, status, created_at, updated_at",
        )
        .bind(id.get())
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        row.try_into()
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, file_path, status, created_at, updated_at
             FROM jobs WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;
        row.try_into()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RepoRow {
    id: i64,
    github_id: Option<i64>,
    name: String,
    owner: String,
    stars: i64,
    processed: bool,
    created_at: DateTime<Utc>,
}

impl From<RepoRow> for Repo {
    fn from(row: RepoRow) -> Self {
        Repo {
            id: row.id,
            github_id: row.github_id,
            name: row.name,
            owner: row.owner,
            stars: row.stars,
            processed: row.processed,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgRepoStore {
    pool: PgPool,
}

impl PgRepoStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepoStore for PgRepoStore {
    async fn insert(&self, repo: NewRepo) -> Result<Repo, StoreError> {
        let row = sqlx::query_as::<_, RepoRow>(
            "INSERT INTO repos (github_id, name, owner, stars)
             VALUES ($1, $2, $3, $4)
             RETURNING id, github_id, name, owner, stars, processed, created_at",
        )
        .bind(repo.github_id)
        .bind(&repo.name)
        .bind(&repo.owner)
        .bind(repo.stars)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Repo>, StoreError> {
        let rows = sqlx::query_as::<_, RepoRow>(
            "SELECT id, github_id, name, owner, stars, processed, created_at
             FROM repos
             ORDER BY id DESC
             LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Repo::from).collect())
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM repos")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
