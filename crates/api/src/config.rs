//! Process configuration for the API binary.

use tracing::warn;

use devpulse_infra::{ConfigError, SchedulerConfig};

const DEV_ADMIN_TOKEN: &str = "dev-admin-token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub admin_token: String,
    /// Postgres-backed stores when set; in-memory otherwise.
    pub database_url: Option<String>,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let admin_token = match lookup("ADMIN_TOKEN").filter(|t| !t.trim().is_empty()) {
            Some(token) => token,
            None => {
                warn!("ADMIN_TOKEN not set; using insecure dev default");
                DEV_ADMIN_TOKEN.to_string()
            }
        };

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            admin_token,
            database_url: lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()),
            scheduler: SchedulerConfig::from_lookup(&lookup)?,
        })
    }
}
