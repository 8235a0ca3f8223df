//! Postgres-backed tenant settings.
//!
//! Polling configuration is stored as a JSONB document in the same camelCase
//! shape the admin API accepts; credentials are plain columns.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use devpulse_core::TenantId;

use super::store::{SettingsError, TenantSettings, TenantSettingsStore, TrackerCredentials};
use crate::jobs::PollingConfig;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenant_settings (
    tenant_id              UUID        PRIMARY KEY,
    name                   TEXT        NOT NULL DEFAULT '',
    organization           TEXT        NULL,
    project                TEXT        NULL,
    personal_access_token  TEXT        NULL,
    polling                JSONB       NOT NULL DEFAULT '{}'::jsonb,
    updated_at             TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// Tenants whose polling document enables at least one job type.
const ENABLED_POLLING_QUERY: &str = r#"
SELECT tenant_id
  FROM tenant_settings
 WHERE polling->>'workItemsEnabled' = 'true'
    OR polling->>'buildsEnabled' = 'true'
    OR polling->>'pullRequestsEnabled' = 'true'
    OR polling->>'overdueCheckEnabled' = 'true'
 ORDER BY tenant_id
"#;

#[derive(Debug, Clone)]
pub struct PostgresSettingsStore {
    pool: Arc<PgPool>,
}

impl PostgresSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), SettingsError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl TenantSettingsStore for PostgresSettingsStore {
    #[instrument(skip(self), fields(tenant = %tenant_id), err)]
    async fn get_tenant_with_credentials(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<TenantSettings>, SettingsError> {
        let row = sqlx::query(
            r#"
            SELECT tenant_id, name, organization, project, personal_access_token, polling
              FROM tenant_settings
             WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_tenant_with_credentials", e))?;

        row.as_ref().map(row_to_settings).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_tenants_with_enabled_polling(&self) -> Result<Vec<TenantId>, SettingsError> {
        let rows = sqlx::query(ENABLED_POLLING_QUERY)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_tenants_with_enabled_polling", e))?;

        rows.iter().map(decode_tenant).collect()
    }

    #[instrument(skip(self, polling), fields(tenant = %tenant_id), err)]
    async fn save_polling_config(
        &self,
        tenant_id: TenantId,
        polling: &PollingConfig,
    ) -> Result<(), SettingsError> {
        let document = serde_json::to_value(polling)
            .map_err(|e| SettingsError::Storage(format!("failed to encode polling config: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO tenant_settings (tenant_id, polling)
            VALUES ($1, $2)
            ON CONFLICT (tenant_id) DO UPDATE
               SET polling = EXCLUDED.polling, updated_at = now()
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(document)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_polling_config", e))?;
        Ok(())
    }

    #[instrument(skip(self, credentials), fields(tenant = %tenant_id), err)]
    async fn save_credentials(
        &self,
        tenant_id: TenantId,
        credentials: &TrackerCredentials,
    ) -> Result<(), SettingsError> {
        sqlx::query(
            r#"
            INSERT INTO tenant_settings (tenant_id, organization, project, personal_access_token)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id) DO UPDATE
               SET organization = EXCLUDED.organization,
                   project = EXCLUDED.project,
                   personal_access_token = EXCLUDED.personal_access_token,
                   updated_at = now()
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(&credentials.organization)
        .bind(&credentials.project)
        .bind(&credentials.personal_access_token)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_credentials", e))?;
        Ok(())
    }
}

fn decode_tenant(row: &sqlx::postgres::PgRow) -> Result<TenantId, SettingsError> {
    let uuid: uuid::Uuid = row
        .try_get("tenant_id")
        .map_err(|e| SettingsError::Storage(format!("failed to decode tenant_id: {e}")))?;
    TenantId::try_from(uuid).map_err(|e| SettingsError::Storage(e.to_string()))
}

fn decode_polling(row: &sqlx::postgres::PgRow) -> Result<PollingConfig, SettingsError> {
    let document: serde_json::Value = row
        .try_get("polling")
        .map_err(|e| SettingsError::Storage(format!("failed to decode polling: {e}")))?;
    serde_json::from_value(document)
        .map_err(|e| SettingsError::Storage(format!("malformed polling document: {e}")))
}

fn row_to_settings(row: &sqlx::postgres::PgRow) -> Result<TenantSettings, SettingsError> {
    let decode = |e: sqlx::Error| SettingsError::Storage(format!("failed to decode settings row: {e}"));

    let organization: Option<String> = row.try_get("organization").map_err(decode)?;
    let project: Option<String> = row.try_get("project").map_err(decode)?;
    let token: Option<String> = row.try_get("personal_access_token").map_err(decode)?;

    let credentials = match (organization, project, token) {
        (None, None, None) => None,
        (o, p, t) => Some(TrackerCredentials {
            organization: o.unwrap_or_default(),
            project: p.unwrap_or_default(),
            personal_access_token: t.unwrap_or_default(),
        }),
    };

    Ok(TenantSettings {
        tenant_id: decode_tenant(row)?,
        name: row.try_get("name").map_err(decode)?,
        credentials,
        polling: decode_polling(row)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> SettingsError {
    match err {
        sqlx::Error::Database(db_err) => {
            SettingsError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            SettingsError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => SettingsError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
