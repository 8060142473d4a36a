//! Engine-wide tunables.
//!
//! This mirrors the shape of the teacher's `config::schema::Config`: a plain,
//! serde-derived struct with a `Default` impl carrying the documented
//! defaults. Loading values from a file or CLI flags into this struct is the
//! embedder's responsibility — that boundary is deliberately not implemented
//! here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the subscription and fault-detection engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Per-session subscription cap enforced in `Manager::create`.
    #[serde(default = "default_max_subscriptions_per_session")]
    pub max_subscriptions_per_session: usize,

    /// Process-wide subscription cap enforced in `Manager::create`.
    #[serde(default = "default_max_subscriptions_global")]
    pub max_subscriptions_global: usize,

    /// Per-cluster concurrent log-capture cap.
    #[serde(default = "default_max_log_captures_per_cluster")]
    pub max_log_captures_per_cluster: usize,

    /// Global concurrent log-capture cap.
    #[serde(default = "default_max_log_captures_global")]
    pub max_log_captures_global: usize,

    /// Per-container truncation ceiling, in bytes.
    #[serde(default = "default_max_log_bytes_per_container")]
    pub max_log_bytes_per_container: usize,

    /// Cap on the number of log samples attached to a single fault notification.
    #[serde(default = "default_max_containers_per_notification")]
    pub max_containers_per_notification: usize,

    /// Dedup TTL, in seconds, applied in `events` mode.
    #[serde(default = "default_event_dedup_window_secs")]
    pub event_dedup_window_secs: u64,

    /// Dedup TTL, in seconds, applied in `faults` mode (both the event-path
    /// fault processor and the informer-path deduplication enricher scale
    /// their own TTL relative to this value — see [`Self::informer_dedup_window_secs`]).
    #[serde(default = "default_fault_dedup_window_secs")]
    pub fault_dedup_window_secs: u64,

    /// Dedup TTL, in seconds, for the informer-path deduplication enricher
    /// (keyed on fault type, resource uid, and container — see §4.6).
    #[serde(default = "default_informer_dedup_window_secs")]
    pub informer_dedup_window_secs: u64,

    /// Session monitor ticker period, in seconds.
    #[serde(default = "default_session_monitor_interval_secs")]
    pub session_monitor_interval_secs: u64,

    /// Ceiling on watch reconnection retries before a subscription is marked degraded.
    #[serde(default = "default_watch_reconnect_max_retries")]
    pub watch_reconnect_max_retries: u32,
}

impl EngineConfig {
    pub fn session_monitor_interval(&self) -> Duration {
        Duration::from_secs(self.session_monitor_interval_secs)
    }

    pub fn event_dedup_window(&self) -> Duration {
        Duration::from_secs(self.event_dedup_window_secs)
    }

    pub fn fault_dedup_window(&self) -> Duration {
        Duration::from_secs(self.fault_dedup_window_secs)
    }

    pub fn informer_dedup_window(&self) -> Duration {
        Duration::from_secs(self.informer_dedup_window_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_session: default_max_subscriptions_per_session(),
            max_subscriptions_global: default_max_subscriptions_global(),
            max_log_captures_per_cluster: default_max_log_captures_per_cluster(),
            max_log_captures_global: default_max_log_captures_global(),
            max_log_bytes_per_container: default_max_log_bytes_per_container(),
            max_containers_per_notification: default_max_containers_per_notification(),
            event_dedup_window_secs: default_event_dedup_window_secs(),
            fault_dedup_window_secs: default_fault_dedup_window_secs(),
            informer_dedup_window_secs: default_informer_dedup_window_secs(),
            session_monitor_interval_secs: default_session_monitor_interval_secs(),
            watch_reconnect_max_retries: default_watch_reconnect_max_retries(),
        }
    }
}

const fn default_max_subscriptions_per_session() -> usize {
    10
}
const fn default_max_subscriptions_global() -> usize {
    100
}
const fn default_max_log_captures_per_cluster() -> usize {
    5
}
const fn default_max_log_captures_global() -> usize {
    20
}
const fn default_max_log_bytes_per_container() -> usize {
    10240
}
const fn default_max_containers_per_notification() -> usize {
    5
}
const fn default_event_dedup_window_secs() -> u64 {
    5
}
const fn default_fault_dedup_window_secs() -> u64 {
    60
}
const fn default_informer_dedup_window_secs() -> u64 {
    900
}
const fn default_session_monitor_interval_secs() -> u64 {
    30
}
const fn default_watch_reconnect_max_retries() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_table() {
        let config = EngineConfig::default();
        assert_eq!(config.max_subscriptions_per_session, 10);
        assert_eq!(config.max_subscriptions_global, 100);
        assert_eq!(config.max_log_captures_per_cluster, 5);
        assert_eq!(config.max_log_captures_global, 20);
        assert_eq!(config.max_log_bytes_per_container, 10240);
        assert_eq!(config.max_containers_per_notification, 5);
        assert_eq!(config.event_dedup_window_secs, 5);
        assert_eq!(config.fault_dedup_window_secs, 60);
        assert_eq!(config.informer_dedup_window_secs, 900);
        assert_eq!(config.session_monitor_interval_secs, 30);
        assert_eq!(config.watch_reconnect_max_retries, 5);
    }

    #[test]
    fn deserializes_with_partial_overrides() {
        let json = r#"{"maxSubscriptionsPerSession": 3}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_subscriptions_per_session, 3);
        assert_eq!(config.max_subscriptions_global, 100);
    }
}
