//! Wire-level data model: normalized cluster events and the notification
//! payloads the manager pushes to sessions (§3).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event as RawEvent;
use serde::{Deserialize, Serialize};

/// Maximum length an event's message is trimmed to before it is embedded in
/// a notification payload.
const MAX_MESSAGE_LEN: usize = 4096;

/// The two event types Kubernetes emits. Mirrors `EventType` in the upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }

    /// Parses a raw `type` field. Returns `None` for anything other than the
    /// two recognized literals (callers should treat this as "unknown", not fatal).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Normal" => Some(EventType::Normal),
            "Warning" => Some(EventType::Warning),
            _ => None,
        }
    }
}

/// Reference to the object an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvolvedObjectRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

/// A normalized cluster event, independent of the upstream `k8s-openapi` type,
/// used as the unit flowing through filters, dedup, and notification payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEvent {
    /// The event object's own name (not the involved object's name).
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub resource_version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub involved_object: InvolvedObjectRef,
    pub count: Option<i32>,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Errors converting a raw `k8s-openapi` event into a [`ClusterEvent`].
#[derive(Debug, thiserror::Error)]
pub enum EventConversionError {
    #[error("event is missing metadata.name")]
    MissingName,
    #[error("event is missing metadata.uid")]
    MissingUid,
    #[error("event is missing metadata.resourceVersion")]
    MissingResourceVersion,
    #[error("event has no usable timestamp")]
    MissingTimestamp,
}

impl ClusterEvent {
    /// Builds a [`ClusterEvent`] from a raw API object, applying the same
    /// "first non-zero of event time / series last-observed / last timestamp
    /// (when count > 1) / first timestamp" resolution order used by the fault
    /// processor (§4.6) for the general-purpose timestamp field.
    pub fn from_raw(raw: &RawEvent) -> Result<Self, EventConversionError> {
        let meta = &raw.metadata;
        let name = meta.name.clone().ok_or(EventConversionError::MissingName)?;
        let namespace = meta.namespace.clone().unwrap_or_default();
        let uid = meta.uid.clone().ok_or(EventConversionError::MissingUid)?;
        let resource_version = meta
            .resource_version
            .clone()
            .ok_or(EventConversionError::MissingResourceVersion)?;

        let labels = meta
            .labels
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect();

        let first_timestamp = raw.first_timestamp.as_ref().map(|t| t.0);
        let last_timestamp = raw.last_timestamp.as_ref().map(|t| t.0);
        let event_time = raw.event_time.as_ref().map(|t| t.0);
        let series_last_observed = raw.series.as_ref().map(|s| s.last_observed_time.0);
        let count = raw.count;

        let timestamp = event_time
            .or(series_last_observed)
            .or_else(|| {
                if count.unwrap_or(0) > 1 {
                    last_timestamp
                } else {
                    None
                }
            })
            .or(first_timestamp)
            .ok_or(EventConversionError::MissingTimestamp)?;

        let event_type = raw
            .type_
            .as_deref()
            .and_then(EventType::parse)
            .unwrap_or(EventType::Normal);

        let mut message = raw.message.clone().unwrap_or_default();
        if message.len() > MAX_MESSAGE_LEN {
            message.truncate(MAX_MESSAGE_LEN);
        }

        let involved = &raw.involved_object;
        let involved_object = InvolvedObjectRef {
            api_version: involved.api_version.clone().unwrap_or_default(),
            kind: involved.kind.clone().unwrap_or_default(),
            name: involved.name.clone().unwrap_or_default(),
            namespace: involved.namespace.clone().unwrap_or_default(),
            uid: involved.uid.clone().unwrap_or_default(),
        };

        Ok(ClusterEvent {
            name,
            namespace,
            uid,
            resource_version,
            timestamp,
            event_type,
            reason: raw.reason.clone().unwrap_or_default(),
            message,
            labels,
            involved_object,
            count,
            first_timestamp,
            last_timestamp,
        })
    }
}

/// One container-log excerpt attached to a fault notification (§3, §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSample {
    pub container: String,
    pub previous: bool,
    pub has_panic: bool,
    pub sample: String,
    pub capture_error: Option<String>,
}

/// Push payload for `kubernetes/events` (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNotification {
    pub subscription_id: String,
    pub cluster: String,
    pub event: ClusterEvent,
}

/// Push payload for `kubernetes/faults` (§3). Superset of [`EventNotification`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultNotification {
    pub subscription_id: String,
    pub cluster: String,
    pub event: ClusterEvent,
    pub logs: Vec<LogSample>,
}

/// Push payload for `kubernetes/subscription_error` (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionErrorNotification {
    pub subscription_id: String,
    pub cluster: String,
    pub error: String,
    pub degraded: bool,
}

/// Severity/level carried on the push envelope, independent of the payload's logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// The three notification shapes the manager ever pushes, tagged by logger (§6 table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "logger", content = "data")]
pub enum Notification {
    #[serde(rename = "kubernetes/events")]
    Events(EventNotification),
    #[serde(rename = "kubernetes/faults")]
    Faults(FaultNotification),
    #[serde(rename = "kubernetes/subscription_error")]
    SubscriptionError(SubscriptionErrorNotification),
}

impl Notification {
    pub fn logger(&self) -> &'static str {
        match self {
            Notification::Events(_) => "kubernetes/events",
            Notification::Faults(_) => "kubernetes/faults",
            Notification::SubscriptionError(_) => "kubernetes/subscription_error",
        }
    }

    pub fn level(&self) -> NotificationLevel {
        match self {
            Notification::Events(_) => NotificationLevel::Info,
            Notification::Faults(_) => NotificationLevel::Warning,
            Notification::SubscriptionError(n) => {
                if n.degraded {
                    NotificationLevel::Warning
                } else {
                    NotificationLevel::Error
                }
            }
        }
    }
}
