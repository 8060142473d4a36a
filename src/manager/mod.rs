//! Subscription Manager (§4.7): the apex component owning subscription
//! lifecycle, limits, session reconciliation, and notification routing.

pub mod types;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use k8s_openapi::api::core::v1::Event as RawEvent;
use kube::Api;
use kube::api::ListParams;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dedup::DedupCache;
use crate::error::{ManagerError, ManagerResult};
use crate::events::{EventNotification, Notification, SubscriptionErrorNotification};
use crate::faults::enrichment::CapturePermits;
use crate::faults::processor::FaultProcessor;
use crate::faults::resource_watcher::{self, ResourceWatcherConfig, ResourceWatcherHandle};
use crate::faults::FaultSignal;
use crate::filter::{Filter, SubscriptionFilters, SubscriptionMode};
use crate::kube_client::ClientGetter;
use crate::session::SessionRegistry;
use crate::watcher::{self, EventWatcherConfig, WatcherEvent};

pub use types::{ManagerStats, Subscription, SubscriptionSummary};

/// `None` marks a reserved id whose `start_watcher` call is still in flight
/// (§4.7 "allocate id, insert into indices, then start the watcher").
struct ManagerState {
    by_id: HashMap<String, Option<Subscription>>,
    by_session: HashMap<String, HashSet<String>>,
    by_cluster: HashMap<String, HashSet<String>>,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_session: HashMap::new(),
            by_cluster: HashMap::new(),
        }
    }
}

/// The apex component. See module docs.
pub struct SubscriptionManager {
    config: EngineConfig,
    client_getter: Arc<dyn ClientGetter>,
    sessions: Arc<dyn SessionRegistry>,
    permits: Arc<CapturePermits>,
    state: RwLock<ManagerState>,
    root_cancel: CancellationToken,
}

impl SubscriptionManager {
    pub fn new(config: EngineConfig, client_getter: Arc<dyn ClientGetter>, sessions: Arc<dyn SessionRegistry>) -> Arc<Self> {
        let permits = Arc::new(CapturePermits::new(config.max_log_captures_per_cluster, config.max_log_captures_global));
        Arc::new(Self {
            config,
            client_getter,
            sessions,
            permits,
            state: RwLock::new(ManagerState::new()),
            root_cancel: CancellationToken::new(),
        })
    }

    /// `Create(sessionID, cluster, mode, filters)` — §4.7.
    pub async fn create(
        self: &Arc<Self>,
        session_id: &str,
        cluster: &str,
        mode: SubscriptionMode,
        filters: SubscriptionFilters,
    ) -> ManagerResult<SubscriptionSummary> {
        if session_id.is_empty() {
            return Err(ManagerError::TransportUnavailable);
        }

        filters
            .validate_for_mode(mode)
            .map_err(|err| ManagerError::InvalidFilter(err.to_string()))?;
        let compiled = filters
            .compile()
            .map_err(|err| ManagerError::InvalidFilter(err.to_string()))?;

        // Cap check, id allocation, and index reservation happen under one
        // write-lock critical section with no `await` inside it, so two
        // concurrent creates near the cap boundary can't both pass the check
        // before either reserves a slot.
        let id = Uuid::new_v4().to_string();
        {
            let mut state = self.state.write().await;
            let session_count = state.by_session.get(session_id).map(HashSet::len).unwrap_or(0);
            if session_count >= self.config.max_subscriptions_per_session {
                return Err(ManagerError::SessionLimitExceeded(session_id.to_string()));
            }
            if state.by_id.len() >= self.config.max_subscriptions_global {
                return Err(ManagerError::GlobalLimitExceeded);
            }
            state.by_id.insert(id.clone(), None);
            state.by_session.entry(session_id.to_string()).or_default().insert(id.clone());
            state.by_cluster.entry(cluster.to_string()).or_default().insert(id.clone());
        }

        match self
            .start_watcher(id.clone(), session_id.to_string(), cluster.to_string(), mode, filters, compiled)
            .await
        {
            Ok(subscription) => {
                let summary = subscription.summary();
                let mut state = self.state.write().await;
                state.by_id.insert(id, Some(subscription));
                Ok(summary)
            }
            Err(err) => {
                // Roll back the reservation: a failed creation must never
                // leave a partial entry in the indices.
                let mut state = self.state.write().await;
                state.by_id.remove(&id);
                remove_index_entry(&mut state.by_session, session_id, &id);
                remove_index_entry(&mut state.by_cluster, cluster, &id);
                Err(err)
            }
        }
    }

    /// `startWatcher(sub)` — §4.7.
    async fn start_watcher(
        self: &Arc<Self>,
        id: String,
        session_id: String,
        cluster: String,
        mode: SubscriptionMode,
        filters: SubscriptionFilters,
        compiled: Filter,
    ) -> ManagerResult<Subscription> {
        let client = self
            .client_getter
            .get(&cluster)
            .await
            .map_err(|err| ManagerError::ClientUnavailable {
                cluster: cluster.clone(),
                source: anyhow::anyhow!(err),
            })?;

        let namespace = compiled.namespace_filter().map(str::to_string);
        let compiled = Arc::new(compiled);

        let events_api: Api<RawEvent> = match &namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let initial_resource_version = capture_initial_resource_version(&events_api).await;

        let dedup = match mode {
            SubscriptionMode::Events => Some(Arc::new(DedupCache::new(self.config.event_dedup_window()))),
            SubscriptionMode::Faults => None,
        };

        let fault_processor = match mode {
            SubscriptionMode::Faults => Some(Arc::new(FaultProcessor::new(
                Arc::new(DedupCache::new(self.config.fault_dedup_window())),
                self.permits.clone(),
                self.config.max_containers_per_notification,
                self.config.max_log_bytes_per_container,
            ))),
            SubscriptionMode::Events => None,
        };

        let watcher_config = EventWatcherConfig {
            client: client.clone(),
            namespace,
            filter: compiled,
            retry_ceiling: self.config.watch_reconnect_max_retries,
            initial_resource_version,
            dedup,
        };
        let (watcher_handle, rx) = watcher::spawn(watcher_config, &self.root_cancel);

        let degraded = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let consumer = self.clone().spawn_consumer(
            id.clone(),
            session_id.clone(),
            cluster.clone(),
            mode,
            client,
            rx,
            fault_processor,
            degraded.clone(),
        );

        Ok(Subscription {
            id,
            session_id,
            cluster,
            mode,
            filters,
            created_at: chrono::Utc::now(),
            degraded,
            watcher: watcher_handle,
            consumer,
        })
    }

    /// Drains the watcher's result channel for one subscription, routing
    /// matched events into notifications (§4.7 "Per-event callback").
    #[allow(clippy::too_many_arguments)]
    fn spawn_consumer(
        self: Arc<Self>,
        id: String,
        session_id: String,
        cluster: String,
        mode: SubscriptionMode,
        client: kube::Client,
        mut rx: mpsc::Receiver<WatcherEvent>,
        fault_processor: Option<Arc<FaultProcessor>>,
        degraded: Arc<std::sync::atomic::AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    WatcherEvent::Matched(cluster_event) => {
                        let notification = match mode {
                            SubscriptionMode::Events => Some(Notification::Events(EventNotification {
                                subscription_id: id.clone(),
                                cluster: cluster.clone(),
                                event: cluster_event,
                            })),
                            SubscriptionMode::Faults => {
                                if let Some(processor) = &fault_processor {
                                    processor
                                        .process(&cluster, &id, &cluster_event, &client)
                                        .await
                                        .map(Notification::Faults)
                                } else {
                                    None
                                }
                            }
                        };

                        let Some(notification) = notification else { continue };
                        if let Err(err) = self.send_notification(&session_id, notification).await {
                            tracing::warn!("dropping subscription {id} after send failure: {err}");
                            let _ = self.cancel(&id).await;
                            return;
                        }
                    }
                    WatcherEvent::Error(message) => {
                        tracing::debug!("subscription {id} watcher reported recoverable error: {message}");
                    }
                    WatcherEvent::Degraded => {
                        degraded.store(true, Ordering::Relaxed);
                        let notification = Notification::SubscriptionError(SubscriptionErrorNotification {
                            subscription_id: id.clone(),
                            cluster: cluster.clone(),
                            error: "watch reconnection budget exhausted".to_string(),
                            degraded: true,
                        });
                        if let Err(err) = self.send_notification(&session_id, notification).await {
                            tracing::warn!("failed to deliver degraded notice for subscription {id}: {err}");
                            let _ = self.cancel(&id).await;
                            return;
                        }
                    }
                }
            }
        })
    }

    /// `sendNotification(sessionID, logger, level, data)` — §4.7.
    async fn send_notification(&self, session_id: &str, notification: Notification) -> ManagerResult<()> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| ManagerError::SessionNotFound(session_id.to_string()))?;

        match tokio::time::timeout(Duration::from_secs(2), session.send(notification)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ManagerError::PushFailed(session_id.to_string(), err.to_string())),
            Err(_) => Err(ManagerError::PushFailed(session_id.to_string(), "push timed out after 2s".to_string())),
        }
    }

    /// `Cancel(id)` — §4.7. A reservation still awaiting `start_watcher` is
    /// not yet cancellable through this path; it is rolled back by `create`
    /// itself on failure.
    pub async fn cancel(&self, id: &str) -> ManagerResult<()> {
        let mut state = self.state.write().await;
        match state.by_id.get(id) {
            Some(Some(_)) => {}
            _ => return Err(ManagerError::NotFound),
        }
        let subscription = state.by_id.remove(id).flatten().expect("checked present and active above");
        remove_index_entry(&mut state.by_session, &subscription.session_id, id);
        remove_index_entry(&mut state.by_cluster, &subscription.cluster, id);
        drop(state);
        subscription.teardown();
        Ok(())
    }

    /// `CancelBySessionAndID(sessionID, id)` — §4.7. Owner-checked: a mismatch
    /// is reported identically to nonexistence.
    pub async fn cancel_by_session_and_id(&self, session_id: &str, id: &str) -> ManagerResult<()> {
        {
            let state = self.state.read().await;
            match state.by_id.get(id) {
                Some(Some(subscription)) if subscription.session_id == session_id => {}
                _ => return Err(ManagerError::NotFound),
            }
        }
        self.cancel(id).await
    }

    /// `CancelSession(sessionID)` — §4.7.
    pub async fn cancel_session(&self, session_id: &str) -> usize {
        let ids: Vec<String> = {
            let state = self.state.read().await;
            state.by_session.get(session_id).map(|ids| ids.iter().cloned().collect()).unwrap_or_default()
        };
        let mut cancelled = 0;
        for id in ids {
            if self.cancel(&id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// `CancelCluster(cluster)` — §4.7.
    pub async fn cancel_cluster(&self, cluster: &str) -> usize {
        let ids: Vec<String> = {
            let state = self.state.read().await;
            state.by_cluster.get(cluster).map(|ids| ids.iter().cloned().collect()).unwrap_or_default()
        };
        let mut cancelled = 0;
        for id in ids {
            if self.cancel(&id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// `CancelAll()` — §4.7.
    pub async fn cancel_all(&self) -> usize {
        let ids: Vec<String> = {
            let state = self.state.read().await;
            state.by_id.keys().cloned().collect()
        };
        let mut cancelled = 0;
        for id in ids {
            if self.cancel(&id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// `ListSubscriptionsForSession(sessionID)` — §4.7. A reservation still
    /// awaiting `start_watcher` has nothing to summarize yet, so it's omitted.
    pub async fn list_subscriptions_for_session(&self, session_id: &str) -> Vec<SubscriptionSummary> {
        let state = self.state.read().await;
        let Some(ids) = state.by_session.get(session_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| state.by_id.get(id).and_then(Option::as_ref))
            .map(Subscription::summary)
            .collect()
    }

    /// `GetStats()` — §4.7. `total_subscriptions` counts in-flight
    /// reservations too, since they already occupy a slot against the caps.
    pub async fn get_stats(&self) -> ManagerStats {
        let state = self.state.read().await;
        ManagerStats {
            total_subscriptions: state.by_id.len(),
            distinct_sessions: state.by_session.len(),
            distinct_clusters: state.by_cluster.len(),
            degraded_count: state.by_id.values().filter_map(Option::as_ref).filter(|sub| sub.is_degraded()).count(),
        }
    }

    /// `StartSessionMonitor(ctx)` — §4.7. Runs until the manager's root
    /// context is cancelled, at which point it calls `CancelAll` and returns.
    pub fn start_session_monitor(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cancel = self.root_cancel.clone();
        let interval = self.config.session_monitor_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it so we don't reconcile before anything can go stale
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        self.cancel_all().await;
                        return;
                    }
                    _ = ticker.tick() => {
                        self.reconcile_stale_sessions().await;
                    }
                }
            }
        })
    }

    async fn reconcile_stale_sessions(&self) {
        let live: HashSet<String> = self.sessions.live_session_ids().await.into_iter().collect();
        let stale: Vec<String> = {
            let state = self.state.read().await;
            state.by_session.keys().filter(|session_id| !live.contains(*session_id)).cloned().collect()
        };
        for session_id in stale {
            tracing::debug!("reclaiming subscriptions for stale session {session_id}");
            self.cancel_session(&session_id).await;
        }
    }

    /// Shuts down the manager: stops the session monitor and cancels every subscription.
    pub async fn shutdown(&self) {
        self.root_cancel.cancel();
    }

    /// Starts the informer-driven resource watcher (§4.5), independent of any
    /// subscription. The returned channel is the "configurable sink" (§4.5);
    /// if nothing reads it, `try_send` failures are logged and nothing blocks.
    pub fn start_resource_watcher(self: &Arc<Self>, client: kube::Client) -> (ResourceWatcherHandle, mpsc::Receiver<FaultSignal>) {
        let config = ResourceWatcherConfig {
            client,
            dedup: Arc::new(DedupCache::new(self.config.informer_dedup_window())),
            permits: self.permits.clone(),
            max_containers_per_notification: self.config.max_containers_per_notification,
            max_log_bytes_per_container: self.config.max_log_bytes_per_container,
        };
        resource_watcher::spawn(config, &self.root_cancel)
    }
}

fn remove_index_entry(index: &mut HashMap<String, HashSet<String>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

async fn capture_initial_resource_version(events_api: &Api<RawEvent>) -> Option<String> {
    let params = ListParams::default().limit(1);
    match events_api.list(&params).await {
        Ok(list) => list.metadata.resource_version,
        Err(err) => {
            tracing::warn!("failed to capture initial resource version, historical events may be delivered: {err}");
            None
        }
    }
}
