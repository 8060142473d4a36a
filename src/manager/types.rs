//! Subscription records and the small read-only views the manager hands out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter::{SubscriptionFilters, SubscriptionMode};
use crate::watcher::EventWatcherHandle;

/// One live subscription. Owned exclusively by the manager (§3 Ownership).
pub struct Subscription {
    pub id: String,
    pub session_id: String,
    pub cluster: String,
    pub mode: SubscriptionMode,
    pub filters: SubscriptionFilters,
    pub created_at: DateTime<Utc>,
    pub degraded: Arc<AtomicBool>,
    pub(super) watcher: EventWatcherHandle,
    pub(super) consumer: tokio::task::JoinHandle<()>,
}

impl Subscription {
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> SubscriptionSummary {
        SubscriptionSummary {
            id: self.id.clone(),
            mode: self.mode,
            cluster: self.cluster.clone(),
            filters: self.filters.clone(),
            created_at: self.created_at,
            degraded: self.is_degraded(),
        }
    }

    /// Stops the backing watcher and its consumer task. Idempotent: cancelling
    /// an already-cancelled token is a no-op, and an already-finished consumer
    /// task simply drains immediately.
    pub(super) fn teardown(&self) {
        self.watcher.cancel();
        self.consumer.abort();
    }
}

/// Read-only snapshot returned from `Create` and `ListSubscriptionsForSession` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub id: String,
    pub mode: SubscriptionMode,
    pub cluster: String,
    pub filters: SubscriptionFilters,
    pub created_at: DateTime<Utc>,
    pub degraded: bool,
}

/// `GetStats()` output (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub total_subscriptions: usize,
    pub distinct_sessions: usize,
    pub distinct_clusters: usize,
    pub degraded_count: usize,
}
