//! Event collection and deduplication into problem groups.
//!
//! Events sharing (namespace, kind, name, reason) are merged into one
//! [`ProblemGroup`]. Groups are ordered by descending aggregate count so the
//! most frequently recurring problem comes first, ties broken by key.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::GatewayError;
use crate::gateway::ClusterGateway;
use crate::k8s::RawEvent;

/// Identity of a problem group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupKey {
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub reason: String,
}

impl GroupKey {
    pub fn of(event: &RawEvent) -> Self {
        Self {
            namespace: event.involved_object.namespace.clone(),
            kind: event.involved_object.kind.clone(),
            name: event.involved_object.name.clone(),
            reason: event.reason.clone(),
        }
    }

    /// Cluster-scoped objects take no `-n` flag.
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
            || matches!(
                self.kind.as_str(),
                "Node" | "PersistentVolume" | "StorageClass" | "Namespace" | "ClusterRole"
            )
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} on {} {}", self.reason, self.kind, self.name)
        } else {
            write!(
                f,
                "{} on {} {}/{}",
                self.reason, self.kind, self.namespace, self.name
            )
        }
    }
}

/// Deduplicated unit of investigation.
///
/// Immutable once created; diagnostics are attached elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemGroup {
    key: GroupKey,
    /// Non-empty, ordered by last seen
    events: Vec<RawEvent>,
    aggregate_count: u64,
}

impl ProblemGroup {
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn events(&self) -> &[RawEvent] {
        &self.events
    }

    pub fn aggregate_count(&self) -> u64 {
        self.aggregate_count
    }

    /// Most recently seen event of the group.
    pub fn latest(&self) -> &RawEvent {
        // Groups are only built from at least one event
        &self.events[self.events.len() - 1]
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.events
            .iter()
            .map(|e| e.first_seen)
            .min()
            .unwrap_or_default()
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.latest().last_seen
    }

    pub fn is_pod(&self) -> bool {
        self.key.kind == "Pod"
    }
}

/// Group events by key.
///
/// Pure and deterministic: every input event lands in exactly one group and
/// identical input always yields identical output.
pub fn group_events(events: impl IntoIterator<Item = RawEvent>) -> Vec<ProblemGroup> {
    let mut buckets: BTreeMap<GroupKey, Vec<RawEvent>> = BTreeMap::new();
    for event in events {
        buckets.entry(GroupKey::of(&event)).or_default().push(event);
    }

    let mut groups: Vec<ProblemGroup> = buckets
        .into_iter()
        .map(|(key, mut events)| {
            events.sort_by(|a, b| {
                a.last_seen
                    .cmp(&b.last_seen)
                    .then_with(|| a.first_seen.cmp(&b.first_seen))
            });
            let aggregate_count = events.iter().map(|e| u64::from(e.count)).sum();
            ProblemGroup {
                key,
                events,
                aggregate_count,
            }
        })
        .collect();

    // BTreeMap iteration already yields keys in order, so a stable sort keeps
    // the lexical tie-break
    groups.sort_by(|a, b| b.aggregate_count.cmp(&a.aggregate_count));
    groups
}

/// Result of one collection pass
#[derive(Debug, Clone)]
pub struct Collection {
    /// Everything the gateway returned
    pub total_fetched: usize,
    /// Events of type Warning among them
    pub warning_count: usize,
    pub groups: Vec<ProblemGroup>,
}

/// Fetches Warning events once and groups them
pub struct EventCollector {
    gateway: Arc<dyn ClusterGateway>,
    timeout: Duration,
}

impl EventCollector {
    pub fn new(gateway: Arc<dyn ClusterGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// Fetch and group. An empty cluster yields an empty collection.
    pub async fn collect(&self) -> Result<Collection, GatewayError> {
        let events = self.gateway.list_warning_events(self.timeout).await?;
        let total_fetched = events.len();

        let warnings: Vec<RawEvent> = events.into_iter().filter(RawEvent::is_warning).collect();
        let warning_count = warnings.len();
        let groups = group_events(warnings);

        info!(
            total_fetched,
            warning_count,
            groups = groups.len(),
            "Collected cluster events"
        );

        Ok(Collection {
            total_fetched,
            warning_count,
            groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::{EventType, InvolvedObject};
    use chrono::TimeZone;

    fn event(ns: &str, name: &str, reason: &str, count: u32, minute: u32) -> RawEvent {
        let ts = Utc.with_ymd_and_hms(2026, 10, 19, 10, minute, 0).unwrap();
        RawEvent {
            event_type: EventType::Warning,
            reason: reason.to_string(),
            message: format!("{reason} at {minute}"),
            involved_object: InvolvedObject {
                kind: "Pod".to_string(),
                name: name.to_string(),
                namespace: ns.to_string(),
            },
            count,
            first_seen: ts,
            last_seen: ts,
        }
    }

    #[test]
    fn test_merges_events_with_same_key() {
        let groups = group_events(vec![
            event("shop", "web-1", "BackOff", 3, 5),
            event("shop", "web-1", "BackOff", 2, 1),
            event("shop", "web-1", "Unhealthy", 1, 2),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key().reason, "BackOff");
        assert_eq!(groups[0].aggregate_count(), 5);
        assert_eq!(groups[0].events().len(), 2);
        // ordered by last seen
        assert_eq!(groups[0].events()[0].message, "BackOff at 1");
        assert_eq!(groups[0].latest().message, "BackOff at 5");
    }

    #[test]
    fn test_orders_by_count_then_key() {
        let groups = group_events(vec![
            event("b", "x", "Failed", 2, 0),
            event("a", "y", "Failed", 2, 0),
            event("c", "z", "Failed", 9, 0),
        ]);
        let namespaces: Vec<&str> = groups.iter().map(|g| g.key().namespace.as_str()).collect();
        assert_eq!(namespaces, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_every_event_lands_exactly_once() {
        let input: Vec<RawEvent> = (0..20)
            .map(|i| event(&format!("ns{}", i % 3), &format!("pod{}", i % 4), "BackOff", 1, i))
            .collect();
        let groups = group_events(input.clone());

        let mut flattened: Vec<RawEvent> =
            groups.iter().flat_map(|g| g.events().iter().cloned()).collect();
        assert_eq!(flattened.len(), input.len());
        for e in &input {
            let pos = flattened.iter().position(|f| f == e).unwrap();
            flattened.remove(pos);
        }
        assert!(flattened.is_empty());
    }

    #[test]
    fn test_grouping_is_idempotent() {
        let input = vec![
            event("a", "p", "BackOff", 1, 3),
            event("b", "q", "Failed", 4, 2),
            event("a", "p", "BackOff", 2, 1),
        ];
        assert_eq!(group_events(input.clone()), group_events(input));
    }

    #[test]
    fn test_empty_input() {
        assert!(group_events(Vec::new()).is_empty());
    }

    #[test]
    fn test_key_display() {
        let groups = group_events(vec![event("shop", "web-1", "BackOff", 1, 0)]);
        assert_eq!(groups[0].key().to_string(), "BackOff on Pod shop/web-1");
    }
}
