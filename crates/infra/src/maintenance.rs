//! Background sweeps: stale lock reclaim, cache expiry, dedupe expiry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::TenantCache;
use crate::config::SchedulerConfig;
use crate::dedupe::DuplicateEventFilter;
use crate::lock::ExecutionLock;

/// Handle to stop the sweeps.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Signal every sweep to stop and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for join in self.joins {
            let _ = join.await;
        }
        info!("maintenance sweeps stopped");
    }
}

#[derive(Debug)]
pub struct Maintenance;

impl Maintenance {
    pub fn spawn(
        lock: Arc<ExecutionLock>,
        cache: Arc<TenantCache>,
        dedupe: Arc<DuplicateEventFilter>,
        config: &SchedulerConfig,
    ) -> MaintenanceHandle {
        let (shutdown, rx) = watch::channel(false);
        let max_run = config.lock_max_run;

        let joins = vec![
            tokio::spawn(sweep_loop("lock", config.lock_sweep_interval, rx.clone(), move || {
                let reclaimed = lock.reclaim_stale(max_run);
                if !reclaimed.is_empty() {
                    warn!(count = reclaimed.len(), "stale execution locks reclaimed");
                }
            })),
            tokio::spawn(sweep_loop("cache", config.cache_sweep_interval, rx.clone(), move || {
                let report = cache.sweep();
                if report.entries_removed > 0 {
                    debug!(
                        entries = report.entries_removed,
                        tenants = report.tenants_removed,
                        "expired cache entries swept"
                    );
                }
            })),
            tokio::spawn(sweep_loop("dedupe", dedupe.window(), rx, move || {
                let removed = dedupe.sweep();
                if removed > 0 {
                    debug!(entries = removed, "expired dedupe entries swept");
                }
            })),
        ];

        info!("maintenance sweeps started");
        MaintenanceHandle { shutdown, joins }
    }
}

async fn sweep_loop<F>(
    name: &'static str,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut sweep: F,
) where
    F: FnMut() + Send + 'static,
{
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => sweep(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(sweep = name, "sweep loop exiting");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devpulse_core::TenantId;
    use serde_json::json;

    use crate::jobs::JobType;

    #[tokio::test(start_paused = true)]
    async fn sweeps_run_on_their_intervals() {
        let lock = Arc::new(ExecutionLock::new());
        let cache = Arc::new(TenantCache::new());
        let dedupe = Arc::new(DuplicateEventFilter::new(Duration::from_secs(30)));
        let config = SchedulerConfig {
            lock_max_run: Duration::from_secs(120),
            lock_sweep_interval: Duration::from_secs(60),
            cache_sweep_interval: Duration::from_secs(10),
            ..SchedulerConfig::default()
        };
        let tenant = TenantId::new();

        lock.acquire(tenant, JobType::Builds).unwrap();
        cache.set(tenant, "builds:web", json!(1), Duration::from_secs(5));
        dedupe.check_and_mark(tenant, "build.complete", "1");

        let handle = Maintenance::spawn(lock.clone(), cache.clone(), dedupe.clone(), &config);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(lock.len(), 1);

        // Dedupe entries go once they are older than twice the window.
        tokio::time::sleep(Duration::from_secs(89)).await;
        assert!(dedupe.is_empty());
        assert_eq!(lock.len(), 1);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(lock.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_sweeping() {
        let cache = Arc::new(TenantCache::new());
        let handle = Maintenance::spawn(
            Arc::new(ExecutionLock::new()),
            cache.clone(),
            Arc::new(DuplicateEventFilter::new(Duration::from_secs(30))),
            &SchedulerConfig::default(),
        );
        handle.shutdown().await;

        let tenant = TenantId::new();
        cache.set(tenant, "k", json!(1), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(120)).await;
        // Expired but never swept: still counted until read.
        assert_eq!(cache.stats().entries, 1);
    }
}
