//! Duplicate-event filter for redelivered webhook inputs.
//!
//! Keyed by tenant, then `(event type, event id)`. A sighting inside the window
//! is a duplicate; once the window has elapsed the key counts as fresh again and
//! its first-seen time restarts. Entries older than twice the window are swept.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use devpulse_core::TenantId;

/// Answer of [`DuplicateEventFilter::check_and_mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DedupeVerdict {
    pub is_duplicate: bool,
    /// Set for duplicates only.
    pub since_first_seen: Option<Duration>,
}

impl DedupeVerdict {
    fn fresh() -> Self {
        Self {
            is_duplicate: false,
            since_first_seen: None,
        }
    }
}

type EventKey = (String, String);

#[derive(Debug)]
pub struct DuplicateEventFilter {
    window: Duration,
    seen: Mutex<HashMap<TenantId, HashMap<EventKey, Instant>>>,
}

impl DuplicateEventFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Atomic check-and-mark.
    pub fn check_and_mark(&self, tenant_id: TenantId, event_type: &str, event_id: &str) -> DedupeVerdict {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let tenant_seen = seen.entry(tenant_id).or_default();
        let key = (event_type.to_string(), event_id.to_string());

        match tenant_seen.get_mut(&key) {
            Some(first_seen) => {
                let elapsed = now.saturating_duration_since(*first_seen);
                if elapsed < self.window {
                    DedupeVerdict {
                        is_duplicate: true,
                        since_first_seen: Some(elapsed),
                    }
                } else {
                    *first_seen = now;
                    DedupeVerdict::fresh()
                }
            }
            None => {
                tenant_seen.insert(key, now);
                DedupeVerdict::fresh()
            }
        }
    }

    /// Drop entries older than twice the window. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let horizon = self.window * 2;
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);

        let mut removed = 0;
        for tenant_seen in seen.values_mut() {
            let before = tenant_seen.len();
            tenant_seen.retain(|_, first| now.saturating_duration_since(*first) < horizon);
            removed += before - tenant_seen.len();
        }
        seen.retain(|_, t| !t.is_empty());
        removed
    }

    pub fn len(&self) -> usize {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> usize {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let n = seen.values().map(HashMap::len).sum();
        seen.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn duplicate_inside_window_fresh_after() {
        let filter = DuplicateEventFilter::new(WINDOW);
        let tenant = TenantId::new();

        assert!(!filter.check_and_mark(tenant, "build.complete", "42").is_duplicate);

        tokio::time::advance(Duration::from_secs(10)).await;
        let verdict = filter.check_and_mark(tenant, "build.complete", "42");
        assert!(verdict.is_duplicate);
        assert_eq!(verdict.since_first_seen, Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(50)).await;
        let verdict = filter.check_and_mark(tenant, "build.complete", "42");
        assert_eq!(verdict, DedupeVerdict::fresh());

        // The window restarted at the fresh sighting.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(filter.check_and_mark(tenant, "build.complete", "42").is_duplicate);
    }

    #[test]
    fn key_includes_tenant_and_event_type() {
        let filter = DuplicateEventFilter::new(WINDOW);
        let t1 = TenantId::new();
        let t2 = TenantId::new();

        assert!(!filter.check_and_mark(t1, "build.complete", "1").is_duplicate);
        assert!(!filter.check_and_mark(t2, "build.complete", "1").is_duplicate);
        assert!(!filter.check_and_mark(t1, "workitem.updated", "1").is_duplicate);
        assert!(filter.check_and_mark(t1, "build.complete", "1").is_duplicate);
        assert_eq!(filter.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reclaims_after_twice_the_window() {
        let filter = DuplicateEventFilter::new(WINDOW);
        let tenant = TenantId::new();

        filter.check_and_mark(tenant, "git.pullrequest.created", "a");
        tokio::time::advance(Duration::from_secs(90)).await;
        filter.check_and_mark(tenant, "git.pullrequest.created", "b");

        assert_eq!(filter.sweep(), 0);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(filter.sweep(), 1);
        assert_eq!(filter.len(), 1);

        assert_eq!(filter.clear(), 1);
        assert!(filter.is_empty());
    }
}
