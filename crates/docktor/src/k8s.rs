//! Kubernetes event types and kubectl JSON decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Event type as reported by the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("Warning") => Self::Warning,
            _ => Self::Normal,
        }
    }
}

/// The object an event refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvolvedObject {
    pub kind: String,
    pub name: String,
    /// Empty for cluster-scoped objects such as Nodes
    pub namespace: String,
}

impl InvolvedObject {
    pub fn is_pod(&self) -> bool {
        self.kind == "Pod"
    }
}

/// A cluster event, sourced verbatim from the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub involved_object: InvolvedObject,
    /// Always at least 1
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl RawEvent {
    pub fn is_warning(&self) -> bool {
        self.event_type == EventType::Warning
    }
}

/// `kubectl get events -o json` list envelope
#[derive(Debug, Deserialize)]
struct KubectlEventList {
    #[serde(default)]
    items: Vec<KubectlEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubectlEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    reason: Option<String>,
    message: Option<String>,
    count: Option<i64>,
    first_timestamp: Option<DateTime<Utc>>,
    last_timestamp: Option<DateTime<Utc>>,
    event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    involved_object: KubectlObjectRef,
    #[serde(default)]
    metadata: KubectlMetadata,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubectlObjectRef {
    kind: Option<String>,
    name: Option<String>,
    namespace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubectlMetadata {
    namespace: Option<String>,
    creation_timestamp: Option<DateTime<Utc>>,
}

impl From<KubectlEvent> for RawEvent {
    fn from(event: KubectlEvent) -> Self {
        // Newer events only carry eventTime; fall back through what is present
        let observed = event
            .event_time
            .or(event.metadata.creation_timestamp)
            .unwrap_or_default();
        let first_seen = event.first_timestamp.unwrap_or(observed);
        let last_seen = event.last_timestamp.unwrap_or(first_seen).max(first_seen);

        let namespace = event
            .involved_object
            .namespace
            .or(event.metadata.namespace)
            .unwrap_or_default();

        Self {
            event_type: EventType::parse(event.event_type.as_deref()),
            reason: event.reason.unwrap_or_default(),
            message: event.message.unwrap_or_default().trim().to_string(),
            involved_object: InvolvedObject {
                kind: event.involved_object.kind.unwrap_or_default(),
                name: event.involved_object.name.unwrap_or_default(),
                namespace,
            },
            count: event
                .count
                .and_then(|c| u32::try_from(c).ok())
                .filter(|c| *c >= 1)
                .unwrap_or(1),
            first_seen,
            last_seen,
        }
    }
}

/// Decode the output of `kubectl get events -o json`.
pub fn parse_event_list(json: &str) -> Result<Vec<RawEvent>, GatewayError> {
    let list: KubectlEventList =
        serde_json::from_str(json).map_err(|e| GatewayError::Decode(e.to_string()))?;
    Ok(list.items.into_iter().map(RawEvent::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS_JSON: &str = r#"{
        "apiVersion": "v1",
        "kind": "List",
        "items": [
            {
                "type": "Warning",
                "reason": "BackOff",
                "message": "Back-off restarting failed container app in pod crashloop-test-7d9f\n",
                "count": 14,
                "firstTimestamp": "2026-10-19T10:00:00Z",
                "lastTimestamp": "2026-10-19T10:30:00Z",
                "involvedObject": {"kind": "Pod", "name": "crashloop-test-7d9f", "namespace": "chaos-experiments"},
                "metadata": {"name": "crashloop-test-7d9f.1", "namespace": "chaos-experiments"}
            },
            {
                "type": "Warning",
                "reason": "NodeNotReady",
                "message": "Node worker-2 status is now: NodeNotReady",
                "count": null,
                "firstTimestamp": null,
                "lastTimestamp": null,
                "eventTime": "2026-10-19T11:00:00.000000Z",
                "involvedObject": {"kind": "Node", "name": "worker-2"},
                "metadata": {"name": "worker-2.2"}
            }
        ]
    }"#;

    #[test]
    fn test_parse_event_list() {
        let events = parse_event_list(EVENTS_JSON).unwrap();
        assert_eq!(events.len(), 2);

        let backoff = &events[0];
        assert!(backoff.is_warning());
        assert_eq!(backoff.reason, "BackOff");
        assert_eq!(backoff.count, 14);
        assert_eq!(backoff.involved_object.namespace, "chaos-experiments");
        assert!(backoff.involved_object.is_pod());
        assert!(!backoff.message.ends_with('\n'));
        assert!(backoff.last_seen > backoff.first_seen);
    }

    #[test]
    fn test_parse_event_without_legacy_timestamps() {
        let events = parse_event_list(EVENTS_JSON).unwrap();
        let node = &events[1];
        assert_eq!(node.count, 1);
        assert_eq!(node.first_seen, node.last_seen);
        assert_eq!(node.first_seen.to_rfc3339(), "2026-10-19T11:00:00+00:00");
        assert!(node.involved_object.namespace.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_event_list("not json"),
            Err(GatewayError::Decode(_))
        ));
    }

    #[test]
    fn test_empty_list_is_valid() {
        assert!(parse_event_list(r#"{"items": []}"#).unwrap().is_empty());
    }
}
