//! Thin free functions over a shared [`Arc<SubscriptionManager>`] (§6),
//! mirroring the split between this crate's headless engine and whatever
//! outer RPC layer invokes these on behalf of remote clients.

use std::sync::Arc;

use crate::error::{ManagerError, ManagerResult};
use crate::filter::{SubscriptionFilters, SubscriptionMode};
use crate::manager::{SubscriptionManager, SubscriptionSummary};

/// `events_subscribe(cluster, mode, filters)` — §6.
pub async fn events_subscribe(
    manager: &Arc<SubscriptionManager>,
    session_id: &str,
    cluster: &str,
    mode: &str,
    filters: SubscriptionFilters,
) -> ManagerResult<SubscriptionSummary> {
    let mode = SubscriptionMode::parse(mode).ok_or_else(|| ManagerError::InvalidMode(mode.to_string()))?;
    manager.create(session_id, cluster, mode, filters).await
}

/// `events_unsubscribe(subscriptionId)` — §6. Unlike subscribe/list, an empty
/// session id is not specially rejected here: it simply never matches a
/// tracked subscription's owning session, so the call falls through to the
/// same "not found" response as any other cross-session attempt.
pub async fn events_unsubscribe(manager: &Arc<SubscriptionManager>, session_id: &str, subscription_id: &str) -> ManagerResult<()> {
    manager.cancel_by_session_and_id(session_id, subscription_id).await
}

/// `events_list_subscriptions()` — §6.
pub async fn events_list_subscriptions(manager: &Arc<SubscriptionManager>, session_id: &str) -> ManagerResult<Vec<SubscriptionSummary>> {
    if session_id.is_empty() {
        return Err(ManagerError::TransportUnavailable);
    }
    Ok(manager.list_subscriptions_for_session(session_id).await)
}
