//! Subscription filter algebra (§4.1): validation, matching, and the
//! server-side/client-side split that keeps API-server load down while
//! still supporting reason-prefix matching the API itself cannot express.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::events::{ClusterEvent, EventType};

/// Subscription mode. Determines which event types are admissible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMode {
    Events,
    Faults,
}

impl SubscriptionMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "events" => Some(SubscriptionMode::Events),
            "faults" => Some(SubscriptionMode::Faults),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionMode::Events => "events",
            SubscriptionMode::Faults => "faults",
        }
    }
}

/// Errors from [`SubscriptionFilters::validate`] / [`SubscriptionFilters::validate_for_mode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("labelSelector is not a valid Kubernetes selector: {0}")]
    InvalidSelector(String),
    #[error("type must be empty, 'Normal', or 'Warning', got '{0}'")]
    InvalidType(String),
    #[error("faults mode does not accept type=Normal")]
    NormalTypeInFaultsMode,
}

/// All fields optional (§3). Empty/`None` means "no constraint" for every field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFilters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub involved_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub involved_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub involved_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A parsed, validated label selector: a conjunction of `key=value` requirements.
///
/// This supports the equality-based subset of the Kubernetes selector grammar
/// (`k=v,k2=v2`), which is all the boundary contract in §4.1 needs: selectors
/// are only ever matched against a flat label map, never against set-based
/// `in`/`notin`/`exists` expressions here.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LabelSelector {
    requirements: Vec<(String, String)>,
}

impl LabelSelector {
    fn parse(raw: &str) -> Result<Self, FilterError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(LabelSelector {
                requirements: Vec::new(),
            });
        }

        let mut requirements = Vec::new();
        for clause in raw.split(',') {
            let clause = clause.trim();
            if clause.is_empty() {
                return Err(FilterError::InvalidSelector(raw.to_string()));
            }
            let mut parts = clause.splitn(2, '=');
            let key = parts.next().unwrap_or_default().trim();
            let value = match parts.next() {
                Some(v) => v.trim(),
                None => return Err(FilterError::InvalidSelector(raw.to_string())),
            };
            if key.is_empty() {
                return Err(FilterError::InvalidSelector(raw.to_string()));
            }
            requirements.push((key.to_string(), value.to_string()));
        }

        Ok(LabelSelector { requirements })
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
    }
}

/// Validated, ready-to-evaluate form of [`SubscriptionFilters`].
///
/// Constructed once at subscription-creation time via [`SubscriptionFilters::compile`]
/// so that per-event matching never re-parses the selector.
pub struct Filter {
    namespaces: BTreeSet<String>,
    selector: Option<LabelSelector>,
    involved_kind: Option<String>,
    involved_name: Option<String>,
    involved_namespace: Option<String>,
    event_type: Option<EventType>,
    reason_prefix: Option<String>,
    raw: SubscriptionFilters,
}

impl SubscriptionFilters {
    /// Validate()  — §4.1. Succeeds iff the selector parses and `type` is
    /// empty or one of the two literals.
    pub fn validate(&self) -> Result<(), FilterError> {
        if let Some(selector) = &self.label_selector {
            LabelSelector::parse(selector)?;
        }
        if let Some(t) = &self.event_type
            && !t.is_empty()
            && EventType::parse(t).is_none()
        {
            return Err(FilterError::InvalidType(t.clone()));
        }
        Ok(())
    }

    /// ValidateForMode(mode) — §4.1. Additionally rejects `{faults, Normal}`.
    pub fn validate_for_mode(&self, mode: SubscriptionMode) -> Result<(), FilterError> {
        self.validate()?;
        if mode == SubscriptionMode::Faults
            && self.event_type.as_deref() == Some(EventType::Normal.as_str())
        {
            return Err(FilterError::NormalTypeInFaultsMode);
        }
        Ok(())
    }

    /// Compiles this filter into its evaluable form. Callers must validate
    /// (for the intended mode) first; `compile` re-validates defensively but
    /// panics on a selector that somehow still fails to parse, since that
    /// would mean `validate` and `compile` disagree about the grammar.
    pub fn compile(&self) -> Result<Filter, FilterError> {
        self.validate()?;
        let selector = match &self.label_selector {
            Some(s) => Some(LabelSelector::parse(s)?),
            None => None,
        };
        let event_type = match &self.event_type {
            Some(t) if !t.is_empty() => Some(
                EventType::parse(t).ok_or_else(|| FilterError::InvalidType(t.clone()))?,
            ),
            _ => None,
        };

        Ok(Filter {
            namespaces: self.namespaces.iter().cloned().collect(),
            selector,
            involved_kind: self.involved_kind.clone(),
            involved_name: self.involved_name.clone(),
            involved_namespace: self.involved_namespace.clone(),
            event_type,
            reason_prefix: self.reason.clone(),
            raw: self.clone(),
        })
    }
}

impl Filter {
    /// Matches(event) — §4.1. Conjunction over all non-empty predicates,
    /// selector evaluated against the event's own labels.
    pub fn matches(&self, event: &ClusterEvent) -> bool {
        self.matches_common(event) && self.selector_matches(&event.labels)
    }

    /// MatchesWithObjectLabels(event, labelMap) — §4.1. As [`Filter::matches`]
    /// but the selector is evaluated against an externally supplied label map
    /// (the involved object's labels, when available) instead of the event's own.
    pub fn matches_with_object_labels(
        &self,
        event: &ClusterEvent,
        object_labels: &BTreeMap<String, String>,
    ) -> bool {
        self.matches_common(event) && self.selector_matches(object_labels)
    }

    fn matches_common(&self, event: &ClusterEvent) -> bool {
        if !self.namespaces.is_empty() && !self.namespaces.contains(&event.namespace) {
            return false;
        }
        if let Some(t) = self.event_type
            && t != event.event_type
        {
            return false;
        }
        if let Some(prefix) = &self.reason_prefix
            && !event.reason.starts_with(prefix.as_str())
        {
            return false;
        }
        if let Some(kind) = &self.involved_kind
            && kind != &event.involved_object.kind
        {
            return false;
        }
        if let Some(name) = &self.involved_name
            && name != &event.involved_object.name
        {
            return false;
        }
        if let Some(ns) = &self.involved_namespace
            && ns != &event.involved_object.namespace
        {
            return false;
        }
        true
    }

    fn selector_matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match &self.selector {
            Some(selector) => selector.matches(labels),
            None => true,
        }
    }

    /// GetNamespaceFilter() — §4.1. Returns the single namespace when exactly
    /// one is specified, else `None` (signals the watcher to use a cluster-scoped watch).
    pub fn namespace_filter(&self) -> Option<&str> {
        if self.namespaces.len() == 1 {
            self.namespaces.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    /// GetInvolvedObjectFieldSelector() — §4.1. Comma-joined API field
    /// selector covering involved-kind/name/namespace (empty if none set).
    pub fn involved_object_field_selector(&self) -> String {
        let mut parts = Vec::new();
        if let Some(kind) = &self.involved_kind {
            parts.push(format!("involvedObject.kind={kind}"));
        }
        if let Some(name) = &self.involved_name {
            parts.push(format!("involvedObject.name={name}"));
        }
        if let Some(ns) = &self.involved_namespace {
            parts.push(format!("involvedObject.namespace={ns}"));
        }
        parts.join(",")
    }

    /// RequiresClientSideFiltering() — §4.1. True iff multiple namespaces are
    /// set, or a reason prefix is set. Selector, single-namespace, and
    /// involved-object filters can all be pushed to the API.
    pub fn requires_client_side_filtering(&self) -> bool {
        self.namespaces.len() > 1 || self.reason_prefix.is_some()
    }

    pub fn raw(&self) -> &SubscriptionFilters {
        &self.raw
    }

    /// The raw label selector string, suitable for passing straight to the
    /// Kubernetes API's own `labelSelector` query parameter.
    pub fn label_selector_raw(&self) -> Option<&str> {
        self.raw.label_selector.as_deref()
    }

    /// Comma-joined field selector combining the involved-object predicates
    /// and the type predicate (the API supports field selectors on both),
    /// for use as the watch/list request's `fieldSelector`.
    pub fn api_field_selector(&self) -> Option<String> {
        let mut parts = Vec::new();
        let involved = self.involved_object_field_selector();
        if !involved.is_empty() {
            parts.push(involved);
        }
        if let Some(t) = self.event_type {
            parts.push(format!("type={}", t.as_str()));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InvolvedObjectRef;
    use chrono::Utc;

    fn event(namespace: &str, reason: &str, event_type: EventType) -> ClusterEvent {
        ClusterEvent {
            name: "ev-1".into(),
            namespace: namespace.into(),
            uid: "uid".into(),
            resource_version: "1".into(),
            timestamp: Utc::now(),
            event_type,
            reason: reason.into(),
            message: String::new(),
            labels: BTreeMap::new(),
            involved_object: InvolvedObjectRef {
                api_version: "v1".into(),
                kind: "Pod".into(),
                name: "nginx-1".into(),
                namespace: namespace.into(),
                uid: "pod-uid".into(),
            },
            count: None,
            first_timestamp: None,
            last_timestamp: None,
        }
    }

    #[test]
    fn validate_rejects_bad_type() {
        let f = SubscriptionFilters {
            event_type: Some("Bogus".into()),
            ..Default::default()
        };
        assert!(matches!(f.validate(), Err(FilterError::InvalidType(_))));
    }

    #[test]
    fn validate_for_mode_rejects_normal_in_faults_mode() {
        let f = SubscriptionFilters {
            event_type: Some("Normal".into()),
            ..Default::default()
        };
        assert!(f.validate_for_mode(SubscriptionMode::Events).is_ok());
        assert!(matches!(
            f.validate_for_mode(SubscriptionMode::Faults),
            Err(FilterError::NormalTypeInFaultsMode)
        ));
    }

    #[test]
    fn reason_prefix_matching_boundaries() {
        let empty = SubscriptionFilters {
            reason: Some(String::new()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(empty.matches(&event("default", "BackOff", EventType::Normal)));

        let exact = SubscriptionFilters {
            reason: Some("BackOff".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(exact.matches(&event("default", "BackOff", EventType::Normal)));

        let too_long = SubscriptionFilters {
            reason: Some("BackOffXX".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(!too_long.matches(&event("default", "BackOff", EventType::Normal)));
    }

    #[test]
    fn namespace_filter_returns_single_only() {
        let single = SubscriptionFilters {
            namespaces: vec!["default".into()],
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert_eq!(single.namespace_filter(), Some("default"));

        let multi = SubscriptionFilters {
            namespaces: vec!["default".into(), "kube-system".into()],
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert_eq!(multi.namespace_filter(), None);
    }

    #[test]
    fn requires_client_side_filtering_matches_rules() {
        let multi_ns = SubscriptionFilters {
            namespaces: vec!["a".into(), "b".into()],
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(multi_ns.requires_client_side_filtering());

        let reason = SubscriptionFilters {
            reason: Some("Back".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(reason.requires_client_side_filtering());

        let selector_only = SubscriptionFilters {
            label_selector: Some("app=nginx".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(!selector_only.requires_client_side_filtering());
    }

    #[test]
    fn matches_is_total_on_any_event_for_every_validated_filter() {
        let filters = vec![
            SubscriptionFilters::default(),
            SubscriptionFilters {
                namespaces: vec!["default".into()],
                label_selector: Some("app=nginx".into()),
                involved_kind: Some("Pod".into()),
                reason: Some("Back".into()),
                ..Default::default()
            },
        ];
        for f in filters {
            f.validate().unwrap();
            let compiled = f.compile().unwrap();
            let _ = compiled.matches(&event("default", "BackOff", EventType::Warning));
            let _ = compiled.matches(&event("other", "Scheduled", EventType::Normal));
        }
    }
}
