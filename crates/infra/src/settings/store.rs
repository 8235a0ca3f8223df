//! Tenant settings: upstream credentials and polling configuration.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use devpulse_core::TenantId;

use crate::jobs::PollingConfig;

/// Connection details for the tenant's project tracker.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerCredentials {
    pub organization: String,
    pub project: String,
    pub personal_access_token: String,
}

impl TrackerCredentials {
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        personal_access_token: impl Into<String>,
    ) -> Self {
        Self {
            organization: organization.into(),
            project: project.into(),
            personal_access_token: personal_access_token.into(),
        }
    }

    /// All three fields present and non-blank.
    pub fn is_complete(&self) -> bool {
        [&self.organization, &self.project, &self.personal_access_token]
            .iter()
            .all(|s| !s.trim().is_empty())
    }
}

impl core::fmt::Debug for TrackerCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrackerCredentials")
            .field("organization", &self.organization)
            .field("project", &self.project)
            .field("personal_access_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantSettings {
    pub tenant_id: TenantId,
    pub name: String,
    pub credentials: Option<TrackerCredentials>,
    #[serde(default)]
    pub polling: PollingConfig,
}

impl TenantSettings {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            name: name.into(),
            credentials: None,
            polling: PollingConfig::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: TrackerCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Credentials, if present and complete.
    pub fn usable_credentials(&self) -> Option<&TrackerCredentials> {
        self.credentials.as_ref().filter(|c| c.is_complete())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("tenant not found: {0}")]
    TenantNotFound(TenantId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Read/write access to tenant settings.
#[async_trait]
pub trait TenantSettingsStore: Send + Sync {
    /// Settings including credentials; `None` for an unknown tenant.
    async fn get_tenant_with_credentials(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<TenantSettings>, SettingsError>;

    /// Tenants with at least one enabled job type.
    async fn list_tenants_with_enabled_polling(&self) -> Result<Vec<TenantId>, SettingsError>;

    /// Replace the tenant's polling configuration.
    async fn save_polling_config(
        &self,
        tenant_id: TenantId,
        polling: &PollingConfig,
    ) -> Result<(), SettingsError>;

    async fn save_credentials(
        &self,
        tenant_id: TenantId,
        credentials: &TrackerCredentials,
    ) -> Result<(), SettingsError>;
}

/// In-memory settings store for tests/dev.
///
/// Saving to an unknown tenant registers it with an empty name.
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    tenants: RwLock<HashMap<TenantId, TenantSettings>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, settings: TenantSettings) {
        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        tenants.insert(settings.tenant_id, settings);
    }

    fn upsert(&self, tenant_id: TenantId, f: impl FnOnce(&mut TenantSettings)) {
        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        let settings = tenants
            .entry(tenant_id)
            .or_insert_with(|| TenantSettings::new(tenant_id, ""));
        f(settings);
    }
}

#[async_trait]
impl TenantSettingsStore for InMemorySettingsStore {
    async fn get_tenant_with_credentials(
        &self,
        tenant_id: TenantId,
    ) -> Result<Option<TenantSettings>, SettingsError> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tenants.get(&tenant_id).cloned())
    }

    async fn list_tenants_with_enabled_polling(&self) -> Result<Vec<TenantId>, SettingsError> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<TenantId> = tenants
            .values()
            .filter(|s| s.polling.has_enabled_jobs())
            .map(|s| s.tenant_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_polling_config(
        &self,
        tenant_id: TenantId,
        polling: &PollingConfig,
    ) -> Result<(), SettingsError> {
        self.upsert(tenant_id, |s| s.polling = polling.clone());
        Ok(())
    }

    async fn save_credentials(
        &self,
        tenant_id: TenantId,
        credentials: &TrackerCredentials,
    ) -> Result<(), SettingsError> {
        self.upsert(tenant_id, |s| s.credentials = Some(credentials.clone()));
        Ok(())
    }
}
