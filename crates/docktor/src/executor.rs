//! Diagnostic executor: the safety boundary of the system.
//!
//! Commands are checked against the read-only allow-list before anything is
//! dispatched. Only connectivity failures are retried; a non-zero exit is
//! informative and is recorded as-is. Every invocation is wall-clock bounded.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, GatewayError};
use crate::gateway::{ClusterGateway, CommandOutput};
use crate::policy::CommandPolicy;
use crate::redact::{redact_secrets, truncate_output};

/// Exit code recorded when a command hits its deadline
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// One executed read-only command and its captured result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticStep {
    /// kubectl argument tokens, verb first
    pub command: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    /// 1-based attempt that produced this result
    pub attempt: u32,
}

impl DiagnosticStep {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMEOUT_EXIT_CODE
    }

    /// Shell-style rendering, e.g. `kubectl describe pod web-1 -n shop`.
    pub fn display_command(&self) -> String {
        display_command(&self.command)
    }
}

pub fn display_command(tokens: &[String]) -> String {
    let mut out = String::from("kubectl");
    for token in tokens {
        out.push(' ');
        if token.is_empty() || token.contains(char::is_whitespace) {
            out.push('\'');
            out.push_str(token);
            out.push('\'');
        } else {
            out.push_str(token);
        }
    }
    out
}

/// Bounded exponential backoff for connectivity failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

/// Runs allow-listed commands against the gateway
pub struct DiagnosticExecutor {
    gateway: Arc<dyn ClusterGateway>,
    policy: CommandPolicy,
    retry: RetryPolicy,
    max_output_bytes: usize,
}

impl DiagnosticExecutor {
    pub fn new(gateway: Arc<dyn ClusterGateway>, config: &ExecutorConfig) -> Self {
        Self {
            gateway,
            policy: CommandPolicy::read_only(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                initial_backoff: config.initial_backoff(),
            },
            max_output_bytes: config.max_output_bytes,
        }
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    /// Execute one command.
    ///
    /// Returns a step for every outcome except a policy violation (nothing is
    /// dispatched) and a connectivity failure that outlived every retry.
    pub async fn execute(
        &self,
        tokens: &[String],
        timeout: Duration,
    ) -> Result<DiagnosticStep, ExecutorError> {
        let command = self.policy.check(tokens)?;
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            // The outer deadline also covers gateways that ignore their timeout
            let result =
                tokio::time::timeout(timeout, self.gateway.run_read_only_command(&command, timeout))
                    .await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let output = match result {
                Ok(Ok(output)) => output,
                Ok(Err(GatewayError::Command {
                    exit_code,
                    stdout,
                    stderr,
                })) => {
                    debug!(command = %display_command(&command), exit_code, "Command failed");
                    CommandOutput {
                        stdout,
                        stderr,
                        exit_code,
                    }
                }
                Err(_) | Ok(Err(GatewayError::Timeout { .. })) => {
                    warn!(command = %display_command(&command), "Command timed out");
                    CommandOutput {
                        stdout: String::new(),
                        stderr: format!(
                            "command timed out after {}s and was abandoned",
                            timeout.as_secs()
                        ),
                        exit_code: TIMEOUT_EXIT_CODE,
                    }
                }
                Ok(Err(GatewayError::Connectivity(message))) => {
                    if attempt > self.retry.max_retries {
                        return Err(ExecutorError::Connectivity {
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        command = %display_command(&command),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Cluster unreachable, retrying: {message}"
                    );
                    sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                Ok(Err(GatewayError::Refused(violation))) => {
                    return Err(ExecutorError::Policy(violation));
                }
                Ok(Err(GatewayError::Decode(message))) => CommandOutput {
                    stdout: String::new(),
                    stderr: message,
                    exit_code: 1,
                },
            };

            return Ok(DiagnosticStep {
                command,
                stdout: truncate_output(redact_secrets(&output.stdout), self.max_output_bytes),
                stderr: truncate_output(redact_secrets(&output.stderr), self.max_output_bytes),
                exit_code: output.exit_code,
                duration_ms,
                attempt,
            });
        }
    }
}
