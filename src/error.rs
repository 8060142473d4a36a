//! Error types for the subscription and fault-detection engine.

/// Errors returned by [`crate::manager::SubscriptionManager`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The supplied filter failed validation.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// An unrecognized subscription mode was requested.
    #[error("invalid subscription mode: {0}")]
    InvalidMode(String),

    /// The caller's session identifier was empty.
    #[error("a push-capable session is required to create or list subscriptions")]
    TransportUnavailable,

    /// The per-session subscription cap was reached.
    #[error("session '{0}' already has the maximum number of subscriptions")]
    SessionLimitExceeded(String),

    /// The process-wide subscription cap was reached.
    #[error("the maximum number of subscriptions has been reached")]
    GlobalLimitExceeded,

    /// No subscription with the given id exists, or it belongs to another session.
    ///
    /// Deliberately indistinguishable from cross-session access: both render
    /// identically so a caller cannot probe for another session's ids.
    #[error("subscription not found")]
    NotFound,

    /// No client-getter was configured, or it failed to produce a client for the cluster.
    #[error("failed to obtain Kubernetes client for cluster '{cluster}': {source}")]
    ClientUnavailable {
        cluster: String,
        #[source]
        source: anyhow::Error,
    },

    /// The session named by `session_id` is no longer present in the session registry.
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// Delivering a push notification to a session failed.
    #[error("failed to push notification to session '{0}': {1}")]
    PushFailed(String, String),
}

/// Errors surfaced by the [`crate::watcher::EventWatcher`].
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// The watcher exhausted its reconnection budget.
    #[error("watch reconnection budget exhausted after {0} retries")]
    RetriesExhausted(u32),

    /// The underlying Kubernetes watch stream failed to start.
    #[error("failed to start watch: {0}")]
    WatchStartFailed(#[source] kube::Error),
}

/// Errors surfaced by log enrichment.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    /// Fetching container logs failed (authorization denied, pod vanished, etc).
    #[error("failed to capture logs for container '{container}': {source}")]
    LogCaptureFailed {
        container: String,
        #[source]
        source: kube::Error,
    },
}

pub type ManagerResult<T> = Result<T, ManagerError>;
pub type WatcherResult<T> = Result<T, WatcherError>;
