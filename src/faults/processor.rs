//! Fault Processor: the event-notification path of fault enrichment (§4.6).
//!
//! Given a raw cluster event, decides whether it is fault-worthy, deduplicates
//! it against a short-TTL cache keyed on event identity, and — if it survives
//! — builds the fault notification including up to N container-log samples.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};

use crate::dedup::{DedupCache, fault_dedup_key};
use crate::events::{ClusterEvent, EventType, FaultNotification, LogSample};

use super::enrichment::{self, CapturePermits};

/// `type = Warning ∧ involvedKind = Pod` (§4.6).
pub fn is_fault_event(event: &ClusterEvent) -> bool {
    event.event_type == EventType::Warning && event.involved_object.kind == "Pod"
}

/// The Fault Processor. Owns the short-TTL event-identity dedup cache and the
/// shared log-capture permits.
pub struct FaultProcessor {
    dedup: Arc<DedupCache>,
    permits: Arc<CapturePermits>,
    max_containers_per_notification: usize,
    max_log_bytes_per_container: usize,
}

impl FaultProcessor {
    pub fn new(
        dedup: Arc<DedupCache>,
        permits: Arc<CapturePermits>,
        max_containers_per_notification: usize,
        max_log_bytes_per_container: usize,
    ) -> Self {
        Self {
            dedup,
            permits,
            max_containers_per_notification,
            max_log_bytes_per_container,
        }
    }

    /// Processes one cluster event. Returns `None` when the event is not
    /// fault-worthy or was recently seen (duplicate suppressed).
    pub async fn process(
        &self,
        cluster: &str,
        subscription_id: &str,
        event: &ClusterEvent,
        client: &Client,
    ) -> Option<FaultNotification> {
        if !is_fault_event(event) {
            return None;
        }

        let key = fault_dedup_key(
            cluster,
            &event.namespace,
            &event.involved_object.name,
            &event.reason,
            event.count.unwrap_or(0),
        );
        if self.dedup.is_duplicate(key) {
            return None;
        }

        let logs = self.capture_logs_for(cluster, event, client).await;

        Some(FaultNotification {
            subscription_id: subscription_id.to_string(),
            cluster: cluster.to_string(),
            event: event.clone(),
            logs,
        })
    }

    async fn capture_logs_for(&self, cluster: &str, event: &ClusterEvent, client: &Client) -> Vec<LogSample> {
        let pod_name = &event.involved_object.name;
        if pod_name.is_empty() {
            return Vec::new();
        }
        let pod_namespace = if event.involved_object.namespace.is_empty() {
            &event.namespace
        } else {
            &event.involved_object.namespace
        };
        let pods: Api<Pod> = Api::namespaced(client.clone(), pod_namespace);
        let pod = match pods.get(pod_name).await {
            Ok(pod) => pod,
            Err(err) => {
                tracing::debug!("could not fetch pod {pod_name} for log enrichment: {err}");
                return Vec::new();
            }
        };
        enrichment::capture_logs(
            &self.permits,
            cluster,
            &pods,
            &pod,
            self.max_containers_per_notification,
            self.max_log_bytes_per_container,
        )
        .await
    }
}
