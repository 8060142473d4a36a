//! Session delivery capability (§9 design notes).
//!
//! The manager needs to push notifications to whatever long-lived session
//! object the embedder uses, without depending on that type directly (which
//! would make this crate depend on the transport/session layer instead of
//! the other way around). [`SessionRegistry`] is the seam: the embedder
//! implements it once over its own session table and hands the manager a
//! trait object.

use async_trait::async_trait;

use crate::events::Notification;

/// Errors a [`SessionRegistry`] implementation can report back to the manager.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} is not known to the registry")]
    UnknownSession(String),
    #[error("session {0} did not accept the notification within the deadline")]
    Timeout(String),
    #[error("session delivery failed: {0}")]
    DeliveryFailed(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// A single addressable push destination. The manager only ever calls
/// [`Self::send`]; everything else about how the session is implemented
/// (websocket, SSE, a channel to another task) is the embedder's business.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn send(&self, notification: Notification) -> SessionResult<()>;

    /// Whether the embedder still considers this session live. Used by the
    /// session monitor (§4.5) to reclaim subscriptions for sessions that
    /// disconnected without an explicit unsubscribe.
    fn is_alive(&self) -> bool;
}

/// Looks up live sessions by id. Implemented by the embedder, injected into
/// the manager at construction time.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    async fn get(&self, session_id: &str) -> Option<std::sync::Arc<dyn SessionHandle>>;

    /// All session ids the embedder currently considers live. Polled by the
    /// session monitor (§4.7) to reclaim subscriptions for sessions that
    /// disconnected without unsubscribing first.
    async fn live_session_ids(&self) -> Vec<String>;
}
