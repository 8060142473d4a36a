//! Edge-triggered fault detectors (§4.4).
//!
//! Each detector compares an old/new resource pair and emits a signal only at
//! the transition into the fault condition. A detector never sees a type
//! mismatch in this crate — `k8s-openapi`'s per-kind types already rule that
//! class of error out statically, so the dynamic type-check the original
//! detectors performed has no equivalent here; `old: None` (the `Add` case)
//! is the only "nothing to compare against" input, and every detector
//! returns the empty list for it.

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Pod};

/// The closed set of fault kinds this engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultType {
    PodCrash,
    CrashLoop,
    NodeUnhealthy,
    DeploymentFailure,
    JobFailure,
}

impl FaultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultType::PodCrash => "PodCrash",
            FaultType::CrashLoop => "CrashLoop",
            FaultType::NodeUnhealthy => "NodeUnhealthy",
            FaultType::DeploymentFailure => "DeploymentFailure",
            FaultType::JobFailure => "JobFailure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultSeverity {
    Info,
    Warning,
    Critical,
}

/// A signal produced by a detector, on its way to dedup and enrichment.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultSignal {
    pub fault_type: FaultType,
    pub uid: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub container: String,
    pub severity: FaultSeverity,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

/// For each container present in both pairs, emits iff the restart count
/// increased, the new state is `Terminated`, and the exit code is nonzero.
pub fn pod_crash(old: Option<&Pod>, new: &Pod) -> Vec<FaultSignal> {
    let Some(old) = old else {
        return Vec::new();
    };
    let (Some(old_status), Some(new_status)) = (&old.status, &new.status) else {
        return Vec::new();
    };
    let (Some(old_containers), Some(new_containers)) =
        (&old_status.container_statuses, &new_status.container_statuses)
    else {
        return Vec::new();
    };

    let meta = &new.metadata;
    let uid = meta.uid.clone().unwrap_or_default();
    let name = meta.name.clone().unwrap_or_default();
    let namespace = meta.namespace.clone().unwrap_or_default();

    let mut signals = Vec::new();
    for new_cs in new_containers {
        let Some(old_cs) = old_containers.iter().find(|c| c.name == new_cs.name) else {
            continue;
        };
        if new_cs.restart_count <= old_cs.restart_count {
            continue;
        }
        let Some(terminated) = new_cs.state.as_ref().and_then(|s| s.terminated.as_ref()) else {
            continue;
        };
        if terminated.exit_code == 0 {
            continue;
        }
        let reason = terminated.reason.clone().unwrap_or_default();
        let message = terminated.message.clone().unwrap_or_default();
        signals.push(FaultSignal {
            fault_type: FaultType::PodCrash,
            uid: uid.clone(),
            kind: "Pod".into(),
            name: name.clone(),
            namespace: namespace.clone(),
            container: new_cs.name.clone(),
            severity: FaultSeverity::Warning,
            context: format!(
                "exit code {}, reason {reason}, message: {message}",
                terminated.exit_code
            ),
            timestamp: Utc::now(),
        });
    }
    signals
}

/// For each container present in both pairs, emits iff new is `Waiting` with
/// reason `CrashLoopBackOff` and old was not.
pub fn crash_loop(old: Option<&Pod>, new: &Pod) -> Vec<FaultSignal> {
    let Some(old) = old else {
        return Vec::new();
    };
    let (Some(old_status), Some(new_status)) = (&old.status, &new.status) else {
        return Vec::new();
    };
    let (Some(old_containers), Some(new_containers)) =
        (&old_status.container_statuses, &new_status.container_statuses)
    else {
        return Vec::new();
    };

    let meta = &new.metadata;
    let uid = meta.uid.clone().unwrap_or_default();
    let name = meta.name.clone().unwrap_or_default();
    let namespace = meta.namespace.clone().unwrap_or_default();

    let mut signals = Vec::new();
    for new_cs in new_containers {
        let Some(old_cs) = old_containers.iter().find(|c| c.name == new_cs.name) else {
            continue;
        };

        let new_waiting_reason = new_cs.state.as_ref().and_then(|s| s.waiting.as_ref()).and_then(|w| w.reason.as_deref());
        if new_waiting_reason != Some("CrashLoopBackOff") {
            continue;
        }
        let old_waiting_reason = old_cs.state.as_ref().and_then(|s| s.waiting.as_ref()).and_then(|w| w.reason.as_deref());
        if old_waiting_reason == Some("CrashLoopBackOff") {
            continue;
        }

        let waiting_message = new_cs
            .state
            .as_ref()
            .and_then(|s| s.waiting.as_ref())
            .and_then(|w| w.message.clone())
            .unwrap_or_default();
        let last_terminated = new_cs.last_state.as_ref().and_then(|s| s.terminated.as_ref());
        let context = match last_terminated {
            Some(t) => format!(
                "restart count {}, waiting message: {waiting_message}, last exit code {}, reason {}, message: {}",
                new_cs.restart_count,
                t.exit_code,
                t.reason.clone().unwrap_or_default(),
                t.message.clone().unwrap_or_default(),
            ),
            None => format!("restart count {}, waiting message: {waiting_message}", new_cs.restart_count),
        };

        signals.push(FaultSignal {
            fault_type: FaultType::CrashLoop,
            uid: uid.clone(),
            kind: "Pod".into(),
            name: name.clone(),
            namespace: namespace.clone(),
            container: new_cs.name.clone(),
            severity: FaultSeverity::Critical,
            context,
            timestamp: Utc::now(),
        });
    }
    signals
}

/// Emits iff the `Ready` condition transitioned from `True` to `False` (critical)
/// or `Unknown` (warning).
pub fn node_unhealthy(old: Option<&Node>, new: &Node) -> Vec<FaultSignal> {
    let Some(old) = old else {
        return Vec::new();
    };
    let old_ready = find_condition(old.status.as_ref().and_then(|s| s.conditions.as_deref()), "Ready");
    let new_ready = find_condition(new.status.as_ref().and_then(|s| s.conditions.as_deref()), "Ready");
    let (Some(old_ready), Some(new_ready)) = (old_ready, new_ready) else {
        return Vec::new();
    };
    if old_ready.status != "True" {
        return Vec::new();
    }
    let severity = match new_ready.status.as_str() {
        "False" => FaultSeverity::Critical,
        "Unknown" => FaultSeverity::Warning,
        _ => return Vec::new(),
    };

    let meta = &new.metadata;
    vec![FaultSignal {
        fault_type: FaultType::NodeUnhealthy,
        uid: meta.uid.clone().unwrap_or_default(),
        kind: "Node".into(),
        name: meta.name.clone().unwrap_or_default(),
        namespace: String::new(),
        container: String::new(),
        severity,
        context: format!(
            "condition Ready status={}, reason={}, message={}",
            new_ready.status,
            new_ready.reason.clone().unwrap_or_default(),
            new_ready.message.clone().unwrap_or_default(),
        ),
        timestamp: Utc::now(),
    }]
}

/// Emits iff the `Progressing` condition transitioned to `False`/`ProgressDeadlineExceeded`.
pub fn deployment_failure(old: Option<&Deployment>, new: &Deployment) -> Vec<FaultSignal> {
    let Some(old) = old else {
        return Vec::new();
    };
    let old_progressing = find_condition(
        old.status.as_ref().and_then(|s| s.conditions.as_deref()),
        "Progressing",
    );
    let new_progressing = find_condition(
        new.status.as_ref().and_then(|s| s.conditions.as_deref()),
        "Progressing",
    );
    let Some(new_progressing) = new_progressing else {
        return Vec::new();
    };
    let is_failing = new_progressing.status == "False" && new_progressing.reason.as_deref() == Some("ProgressDeadlineExceeded");
    if !is_failing {
        return Vec::new();
    }
    if let Some(old_progressing) = old_progressing
        && old_progressing.status == "False"
        && old_progressing.reason.as_deref() == Some("ProgressDeadlineExceeded")
    {
        return Vec::new();
    }

    let meta = &new.metadata;
    vec![FaultSignal {
        fault_type: FaultType::DeploymentFailure,
        uid: meta.uid.clone().unwrap_or_default(),
        kind: "Deployment".into(),
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        container: String::new(),
        severity: FaultSeverity::Critical,
        context: format!(
            "condition Progressing status=False, reason=ProgressDeadlineExceeded, message={}",
            new_progressing.message.clone().unwrap_or_default()
        ),
        timestamp: Utc::now(),
    }]
}

/// Emits iff the `Failed` condition transitioned to `True`. Severity is
/// critical when the reason is `BackoffLimitExceeded`, warning otherwise.
pub fn job_failure(old: Option<&Job>, new: &Job) -> Vec<FaultSignal> {
    let Some(old) = old else {
        return Vec::new();
    };
    let old_failed = find_condition(old.status.as_ref().and_then(|s| s.conditions.as_deref()), "Failed");
    let new_failed = find_condition(new.status.as_ref().and_then(|s| s.conditions.as_deref()), "Failed");
    let Some(new_failed) = new_failed else {
        return Vec::new();
    };
    if new_failed.status != "True" {
        return Vec::new();
    }
    if let Some(old_failed) = old_failed
        && old_failed.status == "True"
    {
        return Vec::new();
    }

    let reason = new_failed.reason.clone().unwrap_or_default();
    let severity = if reason == "BackoffLimitExceeded" {
        FaultSeverity::Critical
    } else {
        FaultSeverity::Warning
    };

    let meta = &new.metadata;
    vec![FaultSignal {
        fault_type: FaultType::JobFailure,
        uid: meta.uid.clone().unwrap_or_default(),
        kind: "Job".into(),
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        container: String::new(),
        severity,
        context: format!(
            "condition Failed status=True, reason={reason}, message={}",
            new_failed.message.clone().unwrap_or_default()
        ),
        timestamp: Utc::now(),
    }]
}

/// Finds a condition by its `type` field, copying out the fields detectors
/// need, generic over the three condition types (Node/Deployment/Job) that
/// otherwise share no common upstream trait.
fn find_condition<T>(conditions: Option<&[T]>, type_: &str) -> Option<FoundCondition>
where
    T: AsCondition,
{
    conditions?.iter().find(|c| c.type_str() == type_).map(|c| FoundCondition {
        status: c.status_str().to_string(),
        reason: c.reason_str().map(str::to_string),
        message: c.message_str().map(str::to_string),
    })
}

struct FoundCondition {
    status: String,
    reason: Option<String>,
    message: Option<String>,
}

trait AsCondition {
    fn type_str(&self) -> &str;
    fn status_str(&self) -> &str;
    fn reason_str(&self) -> Option<&str>;
    fn message_str(&self) -> Option<&str>;
}

impl AsCondition for k8s_openapi::api::core::v1::NodeCondition {
    fn type_str(&self) -> &str {
        &self.type_
    }
    fn status_str(&self) -> &str {
        &self.status
    }
    fn reason_str(&self) -> Option<&str> {
        self.reason.as_deref()
    }
    fn message_str(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl AsCondition for k8s_openapi::api::apps::v1::DeploymentCondition {
    fn type_str(&self) -> &str {
        &self.type_
    }
    fn status_str(&self) -> &str {
        &self.status
    }
    fn reason_str(&self) -> Option<&str> {
        self.reason.as_deref()
    }
    fn message_str(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl AsCondition for k8s_openapi::api::batch::v1::JobCondition {
    fn type_str(&self) -> &str {
        &self.type_
    }
    fn status_str(&self) -> &str {
        &self.status
    }
    fn reason_str(&self) -> Option<&str> {
        self.reason.as_deref()
    }
    fn message_str(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStateWaiting, ContainerStatus, NodeCondition, NodeStatus, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pod_with_container(running: bool, restart_count: i32, exit_code: i32) -> Pod {
        let state = if running {
            ContainerState {
                running: Some(Default::default()),
                ..Default::default()
            }
        } else {
            ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    reason: Some("Error".into()),
                    message: Some("boom".into()),
                    ..Default::default()
                }),
                ..Default::default()
            }
        };
        Pod {
            metadata: ObjectMeta {
                name: Some("web-0".into()),
                namespace: Some("default".into()),
                uid: Some("pod-uid".into()),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "web".into(),
                    restart_count,
                    state: Some(state),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pod_crash_requires_old_state() {
        let new = pod_with_container(false, 1, 1);
        assert!(pod_crash(None, &new).is_empty());
    }

    #[test]
    fn pod_crash_edge_trigger_sequence() {
        let running = pod_with_container(true, 0, 0);
        let terminated_once = pod_with_container(false, 1, 1);

        assert!(pod_crash(Some(&running), &running).is_empty());
        let signals = pod_crash(Some(&running), &terminated_once);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].severity, FaultSeverity::Warning);
        assert!(signals[0].context.contains("exit code 1"));

        assert!(pod_crash(Some(&terminated_once), &terminated_once).is_empty());
    }

    #[test]
    fn pod_crash_ignores_zero_exit_code() {
        let running = pod_with_container(true, 0, 0);
        let terminated_clean = pod_with_container(false, 1, 0);
        assert!(pod_crash(Some(&running), &terminated_clean).is_empty());
    }

    fn pod_waiting(reason: &str, restart_count: i32) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-0".into()),
                namespace: Some("default".into()),
                uid: Some("pod-uid".into()),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "web".into(),
                    restart_count,
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some(reason.into()),
                            message: Some("backing off".into()),
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn crash_loop_triggers_only_on_transition() {
        let ok = pod_waiting("ContainerCreating", 2);
        let looping = pod_waiting("CrashLoopBackOff", 3);
        assert!(crash_loop(Some(&ok), &ok).is_empty());
        let signals = crash_loop(Some(&ok), &looping);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].severity, FaultSeverity::Critical);
        assert!(crash_loop(Some(&looping), &looping).is_empty());
    }

    fn node_with_ready(status: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some("node-1".into()),
                uid: Some("node-uid".into()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".into(),
                    status: status.into(),
                    reason: Some("KubeletNotReady".into()),
                    message: Some("node unresponsive".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn node_unhealthy_transitions() {
        let ready = node_with_ready("True");
        let not_ready = node_with_ready("False");
        let unknown = node_with_ready("Unknown");

        assert!(node_unhealthy(Some(&ready), &ready).is_empty());

        let critical = node_unhealthy(Some(&ready), &not_ready);
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].severity, FaultSeverity::Critical);

        let warning = node_unhealthy(Some(&ready), &unknown);
        assert_eq!(warning.len(), 1);
        assert_eq!(warning[0].severity, FaultSeverity::Warning);

        assert!(node_unhealthy(Some(&not_ready), &not_ready).is_empty());
    }
}
