//! Tenant settings collaborator (credentials + polling configuration).

pub mod postgres;
pub mod store;

pub use postgres::PostgresSettingsStore;
pub use store::{
    InMemorySettingsStore, SettingsError, TenantSettings, TenantSettingsStore, TrackerCredentials,
};
