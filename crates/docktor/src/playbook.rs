//! Default diagnostic playbooks, keyed by event reason.
//!
//! Every playbook describes the involved object first and pulls logs second
//! when the object is a Pod. The follow-ups depend on the reason family.

use crate::collector::GroupKey;

/// Reason families with a dedicated follow-up sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonFamily {
    CrashLoop,
    OutOfMemory,
    Scheduling,
    ImagePull,
    Probe,
    Storage,
    Node,
    Controller,
    Other,
}

impl ReasonFamily {
    pub fn classify(reason: &str) -> Self {
        match reason {
            "BackOff" | "CrashLoopBackOff" | "Failed" | "Error" => Self::CrashLoop,
            "OOMKilled" | "OOMKilling" | "Evicted" | "Preempted" | "Preempting" => {
                Self::OutOfMemory
            }
            "FailedScheduling" => Self::Scheduling,
            "ErrImagePull" | "ImagePullBackOff" | "InspectFailed" | "ErrImageNeverPull" => {
                Self::ImagePull
            }
            "Unhealthy" | "ProbeWarning" => Self::Probe,
            "FailedMount" | "FailedAttachVolume" | "FailedBinding" | "ProvisioningFailed" => {
                Self::Storage
            }
            "NodeNotReady" | "NodeHasDiskPressure" | "NodeHasMemoryPressure" | "Rebooted"
            | "NodeNotSchedulable" => Self::Node,
            "FailedCreate" | "FailedCreatePodSandBox" | "FailedKillPod"
            | "BackoffLimitExceeded" | "DeadlineExceeded" => Self::Controller,
            _ => Self::Other,
        }
    }
}

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

/// Builds commands scoped to one involved object
struct Target<'a> {
    key: &'a GroupKey,
    kind: String,
    namespaced: bool,
}

impl<'a> Target<'a> {
    fn new(key: &'a GroupKey) -> Self {
        Self {
            key,
            kind: key.kind.to_lowercase(),
            namespaced: !key.is_cluster_scoped(),
        }
    }

    fn scoped(&self, mut command: Vec<String>) -> Vec<String> {
        if self.namespaced {
            command.push("-n".to_string());
            command.push(self.key.namespace.clone());
        }
        command
    }

    fn describe(&self) -> Vec<String> {
        self.scoped(cmd(&["describe", &self.kind, &self.key.name]))
    }

    fn logs(&self, tail: u32, previous: bool) -> Vec<String> {
        let mut command = cmd(&["logs", &self.key.name, "--all-containers"]);
        if previous {
            command.push("--previous".to_string());
        }
        command.push(format!("--tail={tail}"));
        self.scoped(command)
    }

    fn object_events(&self) -> Vec<String> {
        let selector = format!("involvedObject.name={}", self.key.name);
        self.scoped(cmd(&["get", "events", "--field-selector", &selector]))
    }

    fn namespace_get(&self, resource: &str) -> Vec<String> {
        if self.key.namespace.is_empty() {
            cmd(&["get", resource, "--all-namespaces"])
        } else {
            cmd(&["get", resource, "-n", &self.key.namespace])
        }
    }
}

/// The ordered default command sequence for a problem group.
///
/// Pure function of the group key and the log tail setting.
pub fn commands_for(key: &GroupKey, log_tail: u32) -> Vec<Vec<String>> {
    let target = Target::new(key);
    let is_pod = key.kind == "Pod";
    let mut commands = vec![target.describe()];
    if is_pod {
        commands.push(target.logs(log_tail, false));
    }

    match ReasonFamily::classify(&key.reason) {
        ReasonFamily::CrashLoop => {
            if is_pod {
                commands.push(target.logs(log_tail, true));
            }
            commands.push(target.object_events());
        }
        ReasonFamily::OutOfMemory => {
            if is_pod {
                commands.push(target.logs(log_tail, true));
                commands.push(target.scoped(cmd(&["top", "pod", &key.name, "--containers"])));
                commands.push(target.scoped(cmd(&["get", "pod", &key.name, "-o", "wide"])));
            }
        }
        ReasonFamily::Scheduling => {
            commands.push(cmd(&["get", "nodes", "-o", "wide"]));
            commands.push(cmd(&["top", "nodes"]));
            commands.push(target.namespace_get("resourcequota"));
        }
        ReasonFamily::ImagePull => {
            if is_pod {
                commands.push(target.scoped(cmd(&[
                    "get",
                    "pod",
                    &key.name,
                    "-o",
                    "jsonpath={.spec.containers[*].image}",
                ])));
            }
            if !key.namespace.is_empty() {
                commands.push(cmd(&[
                    "get",
                    "serviceaccount",
                    "default",
                    "-n",
                    &key.namespace,
                    "-o",
                    "yaml",
                ]));
            }
        }
        ReasonFamily::Probe => {
            if is_pod {
                commands.push(target.logs(log_tail, true));
            }
            commands.push(target.namespace_get("endpoints"));
            if is_pod {
                commands.push(target.scoped(cmd(&["top", "pod", &key.name, "--containers"])));
            }
        }
        ReasonFamily::Storage => {
            commands.push(target.namespace_get("pvc"));
            commands.push(cmd(&["get", "pv"]));
            commands.push(cmd(&["get", "storageclass"]));
        }
        ReasonFamily::Node => {
            let selector = format!("spec.nodeName={}", key.name);
            commands.push(cmd(&["top", "node", &key.name]));
            commands.push(cmd(&[
                "get",
                "pods",
                "--all-namespaces",
                "--field-selector",
                &selector,
            ]));
        }
        ReasonFamily::Controller => {
            commands.push(target.namespace_get("resourcequota"));
            commands.push(target.namespace_get("limitrange"));
            commands.push(target.object_events());
        }
        ReasonFamily::Other => {
            commands.push(target.object_events());
        }
    }

    commands
}
