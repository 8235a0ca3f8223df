//! Execution lock: at most one in-flight run per (tenant, job type).
//!
//! Non-blocking by construction. A failed `acquire` means "skip this tick";
//! nothing is queued and nothing is retried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use devpulse_core::{ExecutionId, TenantId};

use crate::jobs::JobType;

/// A held lock.
#[derive(Debug, Clone, Serialize)]
pub struct LockEntry {
    pub tenant_id: TenantId,
    pub job_type: JobType,
    pub execution_id: ExecutionId,
    pub acquired_at: DateTime<Utc>,
    #[serde(skip)]
    acquired: Instant,
}

impl LockEntry {
    /// How long the lock has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired.elapsed()
    }
}

/// Process-wide lock table, partitioned by tenant.
#[derive(Debug, Default)]
pub struct ExecutionLock {
    entries: Mutex<HashMap<TenantId, HashMap<JobType, LockEntry>>>,
}

impl ExecutionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lock. Returns a fresh execution id, or `None` if held.
    pub fn acquire(&self, tenant_id: TenantId, job_type: JobType) -> Option<ExecutionId> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let tenant_entries = entries.entry(tenant_id).or_default();

        if let Some(holder) = tenant_entries.get(&job_type) {
            debug!(
                tenant = %tenant_id,
                job_type = %job_type,
                holder = %holder.execution_id,
                "execution lock busy"
            );
            return None;
        }

        let execution_id = ExecutionId::new();
        tenant_entries.insert(
            job_type,
            LockEntry {
                tenant_id,
                job_type,
                execution_id,
                acquired_at: Utc::now(),
                acquired: Instant::now(),
            },
        );
        Some(execution_id)
    }

    /// Release the lock iff it is still held by `execution_id`.
    ///
    /// Returns whether an entry was removed. A stale id (the lock was reclaimed
    /// and possibly re-acquired since) is a no-op.
    pub fn release(&self, tenant_id: TenantId, job_type: JobType, execution_id: ExecutionId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tenant_entries) = entries.get_mut(&tenant_id) else {
            return false;
        };

        let matches = tenant_entries
            .get(&job_type)
            .is_some_and(|e| e.execution_id == execution_id);
        if !matches {
            debug!(
                tenant = %tenant_id,
                job_type = %job_type,
                execution_id = %execution_id,
                "stale release ignored"
            );
            return false;
        }

        tenant_entries.remove(&job_type);
        if tenant_entries.is_empty() {
            entries.remove(&tenant_id);
        }
        true
    }

    /// `acquire` wrapped in a guard that releases on drop (including unwinding).
    pub fn try_lock(self: &Arc<Self>, tenant_id: TenantId, job_type: JobType) -> Option<ExecutionGuard> {
        let execution_id = self.acquire(tenant_id, job_type)?;
        Some(ExecutionGuard {
            lock: Arc::clone(self),
            tenant_id,
            job_type,
            execution_id,
            released: false,
        })
    }

    /// Remove every entry held longer than `max_age`.
    pub fn reclaim_stale(&self, max_age: Duration) -> Vec<LockEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut reclaimed = Vec::new();

        for tenant_entries in entries.values_mut() {
            tenant_entries.retain(|_, entry| {
                if entry.held_for() >= max_age {
                    reclaimed.push(entry.clone());
                    false
                } else {
                    true
                }
            });
        }
        entries.retain(|_, t| !t.is_empty());
        drop(entries);

        for entry in &reclaimed {
            warn!(
                tenant = %entry.tenant_id,
                job_type = %entry.job_type,
                execution_id = %entry.execution_id,
                held_secs = entry.held_for().as_secs(),
                "reclaimed stale execution lock"
            );
        }
        reclaimed
    }

    pub fn holder(&self, tenant_id: TenantId, job_type: JobType) -> Option<LockEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(&tenant_id).and_then(|t| t.get(&job_type)).cloned()
    }

    pub fn is_held(&self, tenant_id: TenantId, job_type: JobType) -> bool {
        self.holder(tenant_id, job_type).is_some()
    }

    /// Number of held locks across all tenants.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry (emergency stop). Returns how many were held.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let n = entries.values().map(HashMap::len).sum();
        entries.clear();
        n
    }
}

/// RAII handle for an acquired execution lock.
#[derive(Debug)]
pub struct ExecutionGuard {
    lock: Arc<ExecutionLock>,
    tenant_id: TenantId,
    job_type: JobType,
    execution_id: ExecutionId,
    released: bool,
}

impl ExecutionGuard {
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// Release now; returns whether this execution still held the lock.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.lock
            .release(self.tenant_id, self.job_type, self.execution_id)
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if !self.released {
            self.lock
                .release(self.tenant_id, self.job_type, self.execution_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn second_acquire_is_refused_until_release() {
        let lock = ExecutionLock::new();
        let tenant = TenantId::new();

        let id = lock.acquire(tenant, JobType::PullRequests).unwrap();
        assert!(lock.acquire(tenant, JobType::PullRequests).is_none());

        assert!(lock.release(tenant, JobType::PullRequests, id));
        assert!(lock.acquire(tenant, JobType::PullRequests).is_some());
    }

    #[test]
    fn keys_are_independent() {
        let lock = ExecutionLock::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();

        assert!(lock.acquire(t1, JobType::Builds).is_some());
        assert!(lock.acquire(t1, JobType::WorkItems).is_some());
        assert!(lock.acquire(t2, JobType::Builds).is_some());
        assert_eq!(lock.len(), 3);
    }

    #[test]
    fn stale_release_does_not_clobber_newer_lock() {
        let lock = ExecutionLock::new();
        let tenant = TenantId::new();

        let old = lock.acquire(tenant, JobType::Builds).unwrap();
        let reclaimed = lock.reclaim_stale(Duration::ZERO);
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].execution_id, old);

        let newer = lock.acquire(tenant, JobType::Builds).unwrap();
        assert!(!lock.release(tenant, JobType::Builds, old));
        assert_eq!(
            lock.holder(tenant, JobType::Builds).map(|e| e.execution_id),
            Some(newer)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reclaim_only_touches_old_entries() {
        let lock = ExecutionLock::new();
        let tenant = TenantId::new();

        lock.acquire(tenant, JobType::Builds).unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        lock.acquire(tenant, JobType::WorkItems).unwrap();

        let reclaimed = lock.reclaim_stale(Duration::from_secs(60));
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].job_type, JobType::Builds);
        assert!(lock.is_held(tenant, JobType::WorkItems));
        assert!(!lock.is_held(tenant, JobType::Builds));
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = Arc::new(ExecutionLock::new());
        let tenant = TenantId::new();

        {
            let guard = lock.try_lock(tenant, JobType::OverdueCheck).unwrap();
            assert!(lock.try_lock(tenant, JobType::OverdueCheck).is_none());
            assert!(lock.is_held(tenant, JobType::OverdueCheck));
            let _ = guard.execution_id();
        }
        assert!(lock.is_empty());

        let guard = lock.try_lock(tenant, JobType::OverdueCheck).unwrap();
        assert!(guard.release());
        assert!(lock.is_empty());
    }

    #[test]
    fn concurrent_acquire_has_exactly_one_winner() {
        let lock = Arc::new(ExecutionLock::new());
        let tenant = TenantId::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let lock = lock.clone();
                std::thread::spawn(move || lock.acquire(tenant, JobType::PullRequests))
            })
            .collect();

        let winners = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(winners, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for any interleaving of acquire/release on one key, at most
        /// one execution holds the lock and only the holder's release frees it.
        #[test]
        fn at_most_one_holder(ops in prop::collection::vec(any::<bool>(), 1..64)) {
            let lock = ExecutionLock::new();
            let tenant = TenantId::new();
            let mut held: Option<ExecutionId> = None;
            let mut stale: Vec<ExecutionId> = Vec::new();

            for acquire in ops {
                if acquire {
                    let got = lock.acquire(tenant, JobType::Builds);
                    prop_assert_eq!(got.is_some(), held.is_none());
                    if let Some(id) = got {
                        held = Some(id);
                    }
                } else {
                    for id in &stale {
                        prop_assert!(!lock.release(tenant, JobType::Builds, *id));
                    }
                    if let Some(id) = held.take() {
                        prop_assert!(lock.release(tenant, JobType::Builds, id));
                        stale.push(id);
                    }
                }
                prop_assert_eq!(lock.len(), usize::from(held.is_some()));
            }
        }
    }
}
