//! Cluster query gateway.
//!
//! Thin read-only access to cluster state. The production implementation
//! shells out to `kubectl`; tests substitute scripted gateways through the
//! [`ClusterGateway`] trait.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::k8s::{parse_event_list, RawEvent};
use crate::policy::CommandPolicy;

/// Captured output of a successful read-only command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Read-only cluster access.
///
/// Implementations must never issue a mutating call and must bound every
/// call by the supplied timeout.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// List Warning events across all namespaces.
    async fn list_warning_events(&self, timeout: Duration) -> Result<Vec<RawEvent>, GatewayError>;

    /// Run a read-only command given as kubectl argument tokens (verb first).
    ///
    /// A non-zero exit is reported as [`GatewayError::Command`].
    async fn run_read_only_command(
        &self,
        tokens: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, GatewayError>;
}

/// Messages kubectl itself prints when it cannot reach the API server or the
/// credentials are rejected
const CONNECTIVITY_MARKERS: &[&str] = &[
    "unable to connect to the server",
    "the connection to the server",
    "you must be logged in to the server",
    "the server has asked for the client to provide credentials",
    "no configuration has been provided",
];

/// Whether kubectl's stderr indicates a connectivity or authentication failure
/// rather than an ordinary command error.
///
/// Anything the API server answered (`Error from server ...`) is per-command,
/// even when it relays a kubelet dial failure for a pod on a dead node.
pub fn is_connectivity_failure(stderr: &str) -> bool {
    stderr
        .lines()
        .map(|line| line.trim().to_lowercase())
        .filter(|line| !line.starts_with("error from server"))
        .any(|line| CONNECTIVITY_MARKERS.iter().any(|m| line.contains(m)))
}

/// Gateway backed by the `kubectl` binary
#[derive(Debug, Clone)]
pub struct KubectlGateway {
    config: GatewayConfig,
    policy: CommandPolicy,
}

impl KubectlGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            policy: CommandPolicy::read_only(),
        }
    }

    /// Connection flags prepended to every invocation.
    fn connection_args(&self, timeout: Duration) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.config.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        if let Some(context) = &self.config.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        args.push(format!("--request-timeout={}s", timeout.as_secs().max(1)));
        args
    }

    async fn invoke(&self, args: &[String], timeout: Duration) -> Result<CommandOutput, GatewayError> {
        let mut command = Command::new(&self.config.kubectl);
        command
            .args(self.connection_args(timeout))
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(command = %args.join(" "), "Running kubectl");

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Err(_) => return Err(GatewayError::Timeout { after: timeout }),
            Ok(Err(e)) => {
                return Err(GatewayError::Connectivity(format!(
                    "failed to launch {}: {e}",
                    self.config.kubectl
                )))
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        // Killed by signal has no code
        let exit_code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            return Ok(CommandOutput {
                stdout,
                stderr,
                exit_code,
            });
        }

        if is_connectivity_failure(&stderr) {
            return Err(GatewayError::Connectivity(stderr.trim().to_string()));
        }

        Err(GatewayError::Command {
            exit_code,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl ClusterGateway for KubectlGateway {
    async fn list_warning_events(&self, timeout: Duration) -> Result<Vec<RawEvent>, GatewayError> {
        let args: Vec<String> = [
            "get",
            "events",
            "--all-namespaces",
            "--field-selector",
            "type=Warning",
            "-o",
            "json",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect();

        let output = self.invoke(&args, timeout).await?;
        let mut events = parse_event_list(&output.stdout)?;

        if events.len() > self.config.event_limit {
            events.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
            events.truncate(self.config.event_limit);
        }

        Ok(events)
    }

    async fn run_read_only_command(
        &self,
        tokens: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, GatewayError> {
        let args = self.policy.check(tokens)?;
        self.invoke(&args, timeout).await
    }
}
