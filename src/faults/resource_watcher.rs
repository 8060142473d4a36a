//! Long-lived informer coordinator for Pods, Nodes, Deployments, and Jobs (§4.5).
//!
//! One task per watched kind, matching the teacher's `BgObserver` model of a
//! dedicated task per watched resource. Each task tracks a local old/new
//! cache keyed by uid, runs every detector for that kind on each update,
//! dedups surviving signals against a long-TTL cache, optionally enriches
//! them with pod logs, and forwards them over a bounded channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::watcher::{self, Config, Event};
use kube::{Api, Client};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dedup::{DedupCache, informer_dedup_key};
use crate::watcher::backoff::backoff_duration;

use super::detectors;
use super::enrichment::{self, CapturePermits};
use super::{FaultSeverity, FaultSignal};

const RESULT_BUFFER_CAPACITY: usize = 100;

pub struct ResourceWatcherConfig {
    pub client: Client,
    pub dedup: Arc<DedupCache>,
    pub permits: Arc<CapturePermits>,
    pub max_containers_per_notification: usize,
    pub max_log_bytes_per_container: usize,
}

pub struct ResourceWatcherHandle {
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl ResourceWatcherHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Spawns the four per-kind informer tasks and returns a handle plus the
/// channel every surviving, enriched signal is published on.
pub fn spawn(config: ResourceWatcherConfig, parent_cancel: &CancellationToken) -> (ResourceWatcherHandle, mpsc::Receiver<FaultSignal>) {
    let cancel = parent_cancel.child_token();
    let (tx, rx) = mpsc::channel(RESULT_BUFFER_CAPACITY);
    let shared = Arc::new(config);

    let pods_api: Api<Pod> = Api::all(shared.client.clone());
    let nodes_api: Api<Node> = Api::all(shared.client.clone());
    let deployments_api: Api<Deployment> = Api::all(shared.client.clone());
    let jobs_api: Api<Job> = Api::all(shared.client.clone());

    let tasks = vec![
        tokio::spawn(watch_pods(shared.clone(), pods_api, tx.clone(), cancel.clone())),
        tokio::spawn(watch_kind(
            "Node",
            nodes_api,
            shared.clone(),
            tx.clone(),
            cancel.clone(),
            detectors::node_unhealthy,
        )),
        tokio::spawn(watch_kind(
            "Deployment",
            deployments_api,
            shared.clone(),
            tx.clone(),
            cancel.clone(),
            detectors::deployment_failure,
        )),
        tokio::spawn(watch_kind("Job", jobs_api, shared.clone(), tx, cancel.clone(), detectors::job_failure)),
    ];

    (ResourceWatcherHandle { cancel, tasks }, rx)
}

fn resource_uid<K: kube::Resource>(obj: &K) -> Option<String> {
    obj.meta().uid.clone()
}

/// Generic per-kind watch loop: maintains an old/new cache, runs `detect` on
/// every applied update, dedups, enriches (Pods only — see [`enrich_signal`]),
/// and forwards surviving signals.
async fn watch_kind<K>(
    kind_name: &'static str,
    api: Api<K>,
    config: Arc<ResourceWatcherConfig>,
    tx: mpsc::Sender<FaultSignal>,
    cancel: CancellationToken,
    detect: fn(Option<&K>, &K) -> Vec<FaultSignal>,
) where
    K: kube::Resource<DynamicType = ()> + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    let mut retry_count = 0u32;
    let mut synced = false;
    let cache: Mutex<HashMap<String, K>> = Mutex::new(HashMap::new());

    'reconnect: while !cancel.is_cancelled() {
        let stream = watcher::watcher(api.clone(), Config::default());
        tokio::pin!(stream);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break 'reconnect,
                next = stream.next() => {
                    match next {
                        None => {
                            tracing::warn!("{kind_name} informer stream ended, reconnecting");
                            break;
                        }
                        Some(Err(err)) => {
                            tracing::warn!("{kind_name} informer error: {err}");
                        }
                        Some(Ok(Event::Init)) => {}
                        Some(Ok(Event::InitApply(obj))) => {
                            if let Some(uid) = resource_uid(&obj) {
                                cache.lock().expect("resource cache mutex poisoned").insert(uid, obj);
                            }
                        }
                        Some(Ok(Event::InitDone)) => {
                            synced = true;
                            tracing::debug!("{kind_name} informer cache sync complete");
                        }
                        Some(Ok(Event::Apply(obj))) => {
                            let Some(uid) = resource_uid(&obj) else { continue };
                            let old = cache.lock().expect("resource cache mutex poisoned").get(&uid).cloned();
                            let signals = detect(old.as_ref(), &obj);
                            cache.lock().expect("resource cache mutex poisoned").insert(uid, obj.clone());
                            for signal in signals {
                                dispatch_signal(&config, signal, &tx).await;
                            }
                        }
                        Some(Ok(Event::Delete(obj))) => {
                            if let Some(uid) = resource_uid(&obj) {
                                cache.lock().expect("resource cache mutex poisoned").remove(&uid);
                            }
                        }
                    }
                }
            }
        }

        if !synced {
            tracing::warn!("{kind_name} informer never reached cache sync before disconnecting");
        }
        retry_count += 1;
        let delay = backoff_duration(retry_count.saturating_sub(1));
        tokio::select! {
            () = cancel.cancelled() => break 'reconnect,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Pods get their own loop (rather than going through the generic
/// `watch_kind`) because pod-sourced signals are the only ones eligible for
/// log-based enrichment, and pass the Pods API handle into enrichment.
async fn watch_pods(
    config: Arc<ResourceWatcherConfig>,
    api: Api<Pod>,
    tx: mpsc::Sender<FaultSignal>,
    cancel: CancellationToken,
) {
    watch_kind("Pod", api, config, tx, cancel, pod_detectors).await;
}

fn pod_detectors(old: Option<&Pod>, new: &Pod) -> Vec<FaultSignal> {
    let mut signals = detectors::pod_crash(old, new);
    signals.extend(detectors::crash_loop(old, new));
    signals
}

async fn dispatch_signal(config: &ResourceWatcherConfig, signal: FaultSignal, tx: &mpsc::Sender<FaultSignal>) {
    let key = informer_dedup_key(signal.fault_type.as_str(), &signal.uid, &signal.container);
    if config.dedup.is_duplicate(key) {
        return;
    }

    let signal = enrich_signal(config, signal).await;

    if tx.try_send(signal).is_err() {
        tracing::warn!("resource watcher result buffer full, dropping fault signal");
    }
}

/// Fetches pod logs to fill `context` when it is empty and severity is
/// critical. Never attempted for non-Pod kinds (§4.6); logs are serialized
/// to JSON into the context field.
async fn enrich_signal(config: &ResourceWatcherConfig, mut signal: FaultSignal) -> FaultSignal {
    if signal.kind != "Pod" || !signal.context.is_empty() || signal.severity != FaultSeverity::Critical {
        return signal;
    }
    if signal.namespace.is_empty() || signal.name.is_empty() {
        return signal;
    }

    let pods: Api<Pod> = Api::namespaced(config.client.clone(), &signal.namespace);
    let pod = match pods.get(&signal.name).await {
        Ok(pod) => pod,
        Err(err) => {
            tracing::debug!("could not fetch pod {} for informer-path enrichment: {err}", signal.name);
            return signal;
        }
    };

    let samples = enrichment::capture_logs(
        &config.permits,
        &signal.namespace,
        &pods,
        &pod,
        config.max_containers_per_notification,
        config.max_log_bytes_per_container,
    )
    .await;

    if let Ok(json) = serde_json::to_string(&samples) {
        signal.context = json;
    }
    signal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_buffer_capacity_matches_spec() {
        assert_eq!(RESULT_BUFFER_CAPACITY, 100);
    }
}
