//! Tenant-partitioned, short-TTL result cache.
//!
//! Disposable by construction: every entry can be rebuilt by the next polling
//! run, so nothing here is persisted and a cold cache is always correct.

pub mod tenant_cache;

pub use tenant_cache::{namespaced_key, CacheStats, SweepReport, TenantCache};
