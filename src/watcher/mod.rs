//! Resilient, per-subscription Kubernetes event watch (§4.3).
//!
//! One [`EventWatcher`] backs exactly one subscription. It resumes from a
//! resource-version cursor, retries with exponential backoff, transparently
//! recovers from an expired cursor (HTTP 410 Gone), and reports matched
//! events — plus error and degradation transitions — over a single bounded
//! channel, mirroring the `context_tx`/`ObserverResult` split the teacher's
//! `BgObserver` uses to keep its watch loop decoupled from its consumer.

pub mod backoff;

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Event as RawEvent;
use kube::api::{Api, WatchEvent as K8sWatchEvent, WatchParams};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dedup::{DedupCache, event_dedup_key};
use crate::events::ClusterEvent;
use crate::filter::Filter;
use backoff::backoff_duration;

/// Capacity of the bounded result channel (§5 backpressure: "capacity ~100").
const RESULT_BUFFER_CAPACITY: usize = 100;

/// Configuration for one [`EventWatcher`] instance.
pub struct EventWatcherConfig {
    pub client: kube::Client,
    /// `None` means cluster-wide; `Some` namespace-scopes the watch.
    pub namespace: Option<String>,
    pub filter: Arc<Filter>,
    pub retry_ceiling: u32,
    /// Resource version captured before the watcher starts, so events that
    /// predate subscription creation are never delivered.
    pub initial_resource_version: Option<String>,
    pub dedup: Option<Arc<DedupCache>>,
}

/// Everything the watch loop reports to its consumer.
#[derive(Debug)]
pub enum WatcherEvent {
    /// A cluster event survived client-side filtering and dedup.
    Matched(ClusterEvent),
    /// A recoverable error occurred; the watcher keeps retrying.
    Error(String),
    /// The watcher exhausted its reconnection budget and has stopped.
    Degraded,
}

/// Handle to a running watcher task. Holds the cancellation token the
/// subscription record stores (§3 "a cancellation handle for the backing watcher").
pub struct EventWatcherHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl EventWatcherHandle {
    /// Cooperative stop: the loop observes this on its next select and exits.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns the watch loop and returns its handle plus the bounded result channel.
pub fn spawn(
    config: EventWatcherConfig,
    parent_cancel: &CancellationToken,
) -> (EventWatcherHandle, mpsc::Receiver<WatcherEvent>) {
    let cancel = parent_cancel.child_token();
    let (tx, rx) = mpsc::channel(RESULT_BUFFER_CAPACITY);
    let loop_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        run(config, tx, loop_cancel).await;
    });
    (EventWatcherHandle { cancel, task }, rx)
}

async fn run(config: EventWatcherConfig, tx: mpsc::Sender<WatcherEvent>, cancel: CancellationToken) {
    let api: Api<RawEvent> = match &config.namespace {
        Some(ns) => Api::namespaced(config.client.clone(), ns),
        None => Api::all(config.client.clone()),
    };

    let mut cursor: Option<String> = None;
    let mut retry_count: u32 = 0;

    'reconnect: while !cancel.is_cancelled() {
        let version = cursor
            .clone()
            .or_else(|| config.initial_resource_version.clone())
            .unwrap_or_default();

        let mut wp = WatchParams::default();
        if let Some(field_selector) = config.filter.api_field_selector() {
            wp = wp.fields(&field_selector);
        }
        if let Some(label_selector) = config.filter.label_selector_raw() {
            wp = wp.labels(label_selector);
        }

        let stream = match api.watch(&wp, &version).await {
            Ok(stream) => stream,
            Err(err) => {
                let _ = tx
                    .send(WatcherEvent::Error(format!("failed to start watch: {err}")))
                    .await;
                if !retry_or_degrade(&mut retry_count, &config, &tx, &cancel).await {
                    return;
                }
                continue 'reconnect;
            }
        };
        tokio::pin!(stream);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                next = stream.next() => {
                    match next {
                        None => {
                            tracing::debug!("event watch stream closed, reconnecting");
                            if !retry_or_degrade(&mut retry_count, &config, &tx, &cancel).await {
                                return;
                            }
                            continue 'reconnect;
                        }
                        Some(Ok(K8sWatchEvent::Added(raw) | K8sWatchEvent::Modified(raw) | K8sWatchEvent::Deleted(raw))) => {
                            retry_count = 0;
                            if let Some(rv) = raw.metadata.resource_version.clone() {
                                cursor = Some(rv);
                            }
                            process_raw(&config, &raw, &tx).await;
                        }
                        Some(Ok(K8sWatchEvent::Bookmark(bm))) => {
                            retry_count = 0;
                            cursor = Some(bm.metadata.resource_version.clone());
                        }
                        Some(Ok(K8sWatchEvent::Error(err_resp))) => {
                            if err_resp.code == 410 {
                                tracing::debug!("resource cursor expired (410 Gone), restarting watch");
                                cursor = None;
                                continue 'reconnect;
                            }
                            tracing::warn!("watch reported error: {}", err_resp.message);
                            let _ = tx.send(WatcherEvent::Error(err_resp.message)).await;
                        }
                        Some(Err(err)) => {
                            tracing::warn!("watch stream error: {err}");
                            let _ = tx.send(WatcherEvent::Error(err.to_string())).await;
                        }
                    }
                }
            }
        }
    }
}

/// Increments the retry counter and either sleeps for the backoff duration
/// (returning `true` to continue reconnecting) or reports degradation and
/// returns `false` once the ceiling is reached. With a ceiling of 5, the
/// 5th failed attempt degrades the subscription rather than the 6th.
async fn retry_or_degrade(
    retry_count: &mut u32,
    config: &EventWatcherConfig,
    tx: &mpsc::Sender<WatcherEvent>,
    cancel: &CancellationToken,
) -> bool {
    *retry_count += 1;
    if *retry_count >= config.retry_ceiling {
        let _ = tx.send(WatcherEvent::Degraded).await;
        return false;
    }
    let delay = backoff_duration(*retry_count - 1);
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

async fn process_raw(config: &EventWatcherConfig, raw: &RawEvent, tx: &mpsc::Sender<WatcherEvent>) {
    let event = match ClusterEvent::from_raw(raw) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!("skipping event that failed to normalize: {err}");
            return;
        }
    };

    if !config.filter.matches(&event) {
        return;
    }

    if let Some(dedup) = &config.dedup {
        let key = event_dedup_key(&event.namespace, &event.name, &event.uid, &event.resource_version);
        if dedup.is_duplicate(key) {
            return;
        }
    }

    if tx.try_send(WatcherEvent::Matched(event)).is_err() {
        tracing::warn!("event result buffer full, dropping matched event");
    }
}
