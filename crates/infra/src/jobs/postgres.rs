//! Postgres-backed job store.
//!
//! ## Tenant Isolation
//!
//! `(tenant_id, job_type)` is the primary key and every statement filters on
//! `tenant_id`, so a query can never touch another tenant's JobSpecs.
//!
//! ## Error Mapping
//!
//! All SQLx failures become `JobStoreError::Storage` with the failing operation
//! in the message; a missing row on an update becomes `JobStoreError::NotFound`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use devpulse_core::TenantId;

use super::store::{JobStore, JobStoreError};
use super::types::{JobConfig, JobOutcome, JobRunStatus, JobSpec, JobSpecStatus, JobType};

/// Idempotent DDL for the `polling_jobs` table.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS polling_jobs (
    tenant_id    UUID        NOT NULL,
    job_type     TEXT        NOT NULL,
    enabled      BOOLEAN     NOT NULL,
    schedule     TEXT        NOT NULL,
    status       TEXT        NOT NULL DEFAULT 'active',
    last_run     TIMESTAMPTZ NULL,
    last_result  TEXT        NOT NULL DEFAULT 'pending',
    last_error   TEXT        NULL,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (tenant_id, job_type)
)
"#;

const SELECT_COLUMNS: &str = "tenant_id, job_type, enabled, schedule, status, last_run, \
                              last_result, last_error, created_at, updated_at";

/// Postgres job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn fetch(&self, tenant_id: TenantId, sql: &str) -> Result<Vec<JobSpec>, JobStoreError> {
        let rows = sqlx::query(sql)
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_jobs", e))?;

        rows.iter().map(row_to_spec).collect()
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, config), fields(tenant = %tenant_id, job_type = %job_type), err)]
    async fn create_or_update_job(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        config: &JobConfig,
    ) -> Result<JobSpec, JobStoreError> {
        let sql = format!(
            r#"
            INSERT INTO polling_jobs (tenant_id, job_type, enabled, schedule, status)
            VALUES ($1, $2, $3, $4, 'active')
            ON CONFLICT (tenant_id, job_type) DO UPDATE
               SET enabled = EXCLUDED.enabled,
                   schedule = EXCLUDED.schedule,
                   status = 'active',
                   updated_at = now()
            RETURNING {SELECT_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(job_type.as_str())
            .bind(config.enabled)
            .bind(&config.schedule)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_or_update_job", e))?;

        row_to_spec(&row)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, job_type = %job_type), err)]
    async fn get_job(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
    ) -> Result<Option<JobSpec>, JobStoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM polling_jobs WHERE tenant_id = $1 AND job_type = $2"
        );
        let row = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(job_type.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        row.as_ref().map(row_to_spec).transpose()
    }

    #[instrument(skip(self), fields(tenant = %tenant_id), err)]
    async fn list_jobs(&self, tenant_id: TenantId) -> Result<Vec<JobSpec>, JobStoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM polling_jobs WHERE tenant_id = $1");
        let mut specs = self.fetch(tenant_id, &sql).await?;
        specs.sort_by_key(|s| s.job_type);
        Ok(specs)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id), err)]
    async fn get_active_jobs(&self, tenant_id: TenantId) -> Result<Vec<JobSpec>, JobStoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM polling_jobs \
             WHERE tenant_id = $1 AND enabled AND status = 'active'"
        );
        let mut specs = self.fetch(tenant_id, &sql).await?;
        specs.sort_by_key(|s| s.job_type);
        Ok(specs)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id), err)]
    async fn pause_jobs(&self, tenant_id: TenantId) -> Result<usize, JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE polling_jobs
               SET status = 'paused', updated_at = now()
             WHERE tenant_id = $1 AND status <> 'paused'
            "#,
        )
        .bind(tenant_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pause_jobs", e))?;

        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self), fields(tenant = %tenant_id, job_type = %job_type), err)]
    async fn update_last_run(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        at: DateTime<Utc>,
    ) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE polling_jobs
               SET last_run = $3, last_result = 'pending', updated_at = now()
             WHERE tenant_id = $1 AND job_type = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(job_type.as_str())
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_last_run", e))?;

        expect_one(result.rows_affected(), tenant_id, job_type)
    }

    #[instrument(skip(self, outcome), fields(tenant = %tenant_id, job_type = %job_type), err)]
    async fn update_job_result(
        &self,
        tenant_id: TenantId,
        job_type: JobType,
        outcome: &JobOutcome,
    ) -> Result<(), JobStoreError> {
        let (status, error) = match outcome {
            JobOutcome::Success => (JobRunStatus::Success, None),
            JobOutcome::Error(e) => (JobRunStatus::Error, Some(e.as_str())),
        };

        let result = sqlx::query(
            r#"
            UPDATE polling_jobs
               SET last_result = $3, last_error = $4, updated_at = now()
             WHERE tenant_id = $1 AND job_type = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(job_type.as_str())
        .bind(status.as_str())
        .bind(error)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_job_result", e))?;

        expect_one(result.rows_affected(), tenant_id, job_type)
    }
}

fn expect_one(rows: u64, tenant_id: TenantId, job_type: JobType) -> Result<(), JobStoreError> {
    if rows == 0 {
        return Err(JobStoreError::NotFound {
            tenant_id,
            job_type,
        });
    }
    Ok(())
}

fn row_to_spec(row: &sqlx::postgres::PgRow) -> Result<JobSpec, JobStoreError> {
    let decode = |e: sqlx::Error| JobStoreError::Storage(format!("failed to decode job row: {e}"));

    let tenant_uuid: uuid::Uuid = row.try_get("tenant_id").map_err(decode)?;
    let job_type: String = row.try_get("job_type").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let last_result: String = row.try_get("last_result").map_err(decode)?;

    Ok(JobSpec {
        tenant_id: TenantId::try_from(tenant_uuid)
            .map_err(|e| JobStoreError::Storage(e.to_string()))?,
        job_type: job_type
            .parse()
            .map_err(|e: devpulse_core::DomainError| JobStoreError::Storage(e.to_string()))?,
        enabled: row.try_get("enabled").map_err(decode)?,
        schedule: row.try_get("schedule").map_err(decode)?,
        status: JobSpecStatus::parse(&status)
            .ok_or_else(|| JobStoreError::Storage(format!("unknown job status '{status}'")))?,
        last_run: row.try_get("last_run").map_err(decode)?,
        last_result: JobRunStatus::parse(&last_result).ok_or_else(|| {
            JobStoreError::Storage(format!("unknown job result '{last_result}'"))
        })?,
        last_error: row.try_get("last_error").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
