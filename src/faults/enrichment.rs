//! Bounded, concurrency-limited container log capture and panic-pattern
//! scanning (§4.6), shared by the event-stream fault processor and the
//! informer-path deduplication enricher.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::LogParams;
use tokio::sync::Semaphore;

use crate::events::LogSample;

/// Case-insensitive vocabulary that flips `hasPanic` (§4.6).
const PANIC_VOCABULARY: &[&str] = &["panic:", "fatal", "sigsegv", "segfault", "goroutine"];

pub fn detect_panic(text: &str) -> bool {
    let lower = text.to_lowercase();
    PANIC_VOCABULARY.iter().any(|needle| lower.contains(needle))
}

/// Two-level non-blocking concurrency limiter for log capture (§4.6, §5).
/// `try_acquire` never blocks: if either level is saturated the caller skips
/// enrichment entirely rather than stalling event processing.
pub struct CapturePermits {
    global: Arc<Semaphore>,
    per_cluster: dashmap_like::ClusterSemaphores,
}

/// A tiny sharded-map-over-a-mutex stand-in; the only structure this module
/// needs is "get or create a semaphore per cluster name", which doesn't
/// justify pulling in a sharded-map crate the teacher never uses.
mod dashmap_like {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use tokio::sync::Semaphore;

    pub struct ClusterSemaphores {
        permits: usize,
        inner: Mutex<HashMap<String, Arc<Semaphore>>>,
    }

    impl ClusterSemaphores {
        pub fn new(permits: usize) -> Self {
            Self {
                permits,
                inner: Mutex::new(HashMap::new()),
            }
        }

        pub fn get(&self, cluster: &str) -> Arc<Semaphore> {
            let mut inner = self.inner.lock().expect("cluster semaphore map poisoned");
            inner
                .entry(cluster.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.permits)))
                .clone()
        }
    }
}

impl CapturePermits {
    pub fn new(per_cluster: usize, global: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global)),
            per_cluster: dashmap_like::ClusterSemaphores::new(per_cluster),
        }
    }

    /// Attempts to reserve one global and one per-cluster slot. Returns
    /// `None` (never blocks) if either level is saturated.
    fn try_acquire(&self, cluster: &str) -> Option<(tokio::sync::OwnedSemaphorePermit, tokio::sync::OwnedSemaphorePermit)> {
        let global_permit = Arc::clone(&self.global).try_acquire_owned().ok()?;
        let cluster_sem = self.per_cluster.get(cluster);
        let cluster_permit = match cluster_sem.try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return None,
        };
        Some((global_permit, cluster_permit))
    }
}

/// Captures up to `max_containers` containers' logs for `pod`, honoring the
/// two-level capture budget. Returns an empty vec (not an error) when the
/// budget is exhausted, matching "never blocks event processing" (§4.6).
pub async fn capture_logs(
    permits: &CapturePermits,
    cluster: &str,
    pods: &Api<Pod>,
    pod: &Pod,
    max_containers: usize,
    max_bytes_per_container: usize,
) -> Vec<LogSample> {
    let Some((_global, _cluster)) = permits.try_acquire(cluster) else {
        tracing::debug!("log capture budget exhausted, skipping enrichment for cluster {cluster}");
        return Vec::new();
    };

    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    let container_names: Vec<String> = pod
        .spec
        .as_ref()
        .map(|spec| {
            if !spec.containers.is_empty() {
                spec.containers.iter().map(|c| c.name.clone()).collect()
            } else {
                spec.init_containers
                    .as_ref()
                    .map(|containers| containers.iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_default()
            }
        })
        .unwrap_or_default();

    let mut samples = Vec::new();
    for container in container_names.into_iter().take(max_containers) {
        samples.push(fetch_one(pods, &pod_name, &container, false, max_bytes_per_container).await);

        if let Ok(previous) = fetch_previous(pods, &pod_name, &container, max_bytes_per_container).await
            && let Some(previous) = previous
        {
            samples.push(previous);
        }
    }
    samples
}

async fn fetch_one(
    pods: &Api<Pod>,
    pod_name: &str,
    container: &str,
    previous: bool,
    max_bytes: usize,
) -> LogSample {
    let params = LogParams {
        container: Some(container.to_string()),
        previous,
        ..Default::default()
    };
    match pods.logs(pod_name, &params).await {
        Ok(text) => {
            let truncated = truncate_sample(&text, max_bytes);
            let has_panic = detect_panic(&truncated);
            LogSample {
                container: container.to_string(),
                previous,
                has_panic,
                sample: truncated,
                capture_error: None,
            }
        }
        Err(err) => LogSample {
            container: container.to_string(),
            previous,
            has_panic: false,
            sample: String::new(),
            capture_error: Some(err.to_string()),
        },
    }
}

/// Truncates `text` to at most `max_bytes` bytes, landing on a char boundary
/// so a multi-byte UTF-8 sequence straddling the ceiling isn't split.
fn truncate_sample(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

/// Attempts the previous-container fetch. Absence (no previous terminated
/// instance) is not an error: returns `Ok(None)` and the caller omits it silently.
async fn fetch_previous(
    pods: &Api<Pod>,
    pod_name: &str,
    container: &str,
    max_bytes: usize,
) -> Result<Option<LogSample>, kube::Error> {
    let params = LogParams {
        container: Some(container.to_string()),
        previous: true,
        ..Default::default()
    };
    match pods.logs(pod_name, &params).await {
        Ok(text) if !text.is_empty() => {
            let truncated = truncate_sample(&text, max_bytes);
            let has_panic = detect_panic(&truncated);
            Ok(Some(LogSample {
                container: container.to_string(),
                previous: true,
                has_panic,
                sample: truncated,
                capture_error: None,
            }))
        }
        Ok(_) => Ok(None),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
        Err(err) => Err(err),
    }
}
