//! Error taxonomy for the triage pipeline.
//!
//! Only [`DocktorError`] ever reaches the top level. Everything below the
//! group level is recorded in the report instead of being raised.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the cluster query gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// API endpoint unreachable or authentication failed
    #[error("cluster unreachable: {0}")]
    Connectivity(String),

    /// The command ran but exited non-zero (e.g. object not found)
    #[error("command exited with status {exit_code}: {stderr}")]
    Command {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The call exceeded its caller-supplied timeout
    #[error("command timed out after {}s", after.as_secs())]
    Timeout { after: Duration },

    /// The gateway refused to dispatch a non read-only command
    #[error(transparent)]
    Refused(#[from] PolicyViolation),

    /// Cluster output could not be decoded
    #[error("failed to decode cluster response: {0}")]
    Decode(String),
}

/// A command that is not allowed to reach the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("empty command")]
    Empty,

    #[error("verb `{verb}` is not on the read-only allow-list")]
    DisallowedVerb { verb: String },

    #[error("flag `{flag}` is not permitted for diagnostic commands")]
    DisallowedFlag { flag: String },
}

/// Errors returned by the diagnostic executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Rejected before dispatch; never retried
    #[error("policy violation: {0}")]
    Policy(#[from] PolicyViolation),

    /// Connectivity failure that survived every retry
    #[error("cluster unreachable after {attempts} attempts: {message}")]
    Connectivity { attempts: u32, message: String },
}

/// Failure modes of the analysis synthesizer.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("rate limited by analysis service")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("analysis service rejected credentials: {0}")]
    Auth(String),

    #[error("analysis service timed out")]
    Timeout,

    #[error("analysis service is not configured (missing API key)")]
    NotConfigured,

    #[error("analysis service error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid analysis response: {0}")]
    InvalidResponse(String),

    #[error("failed to render prompt: {0}")]
    Prompt(String),
}

impl SynthesisError {
    /// Whether the caller should back off and try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout)
    }

    /// Whether the service rejected the credentials. A missing key is not
    /// a rejection.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Report assembly received inconsistent inputs.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("expected {groups} entries per group, got {investigations} investigations and {analyses} analyses")]
    LengthMismatch {
        groups: usize,
        investigations: usize,
        analyses: usize,
    },

    #[error("analysis for {found} does not belong to group {expected}")]
    KeyMismatch { expected: String, found: String },
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Run-aborting errors surfaced to the caller.
#[derive(Debug, Error)]
pub enum DocktorError {
    #[error("cluster unreachable: {0}")]
    Connectivity(String),

    #[error("failed to list cluster events: {0}")]
    EventListing(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GatewayError> for DocktorError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Connectivity(msg) => Self::Connectivity(msg),
            GatewayError::Timeout { after } => Self::Connectivity(format!(
                "event listing timed out after {}s",
                after.as_secs()
            )),
            other => Self::EventListing(other.to_string()),
        }
    }
}

pub type Result<T, E = DocktorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_error_classification() {
        assert!(SynthesisError::Timeout.is_transient());
        assert!(SynthesisError::RateLimited {
            retry_after_secs: None
        }
        .is_transient());
        assert!(!SynthesisError::Auth("bad key".into()).is_transient());
        assert!(!SynthesisError::NotConfigured.is_auth());
        assert!(!SynthesisError::Timeout.is_auth());
    }

    #[test]
    fn test_gateway_timeout_is_connectivity_at_top_level() {
        let err: DocktorError = GatewayError::Timeout {
            after: Duration::from_secs(30),
        }
        .into();
        assert!(matches!(err, DocktorError::Connectivity(_)));

        let err: DocktorError = GatewayError::Decode("bad json".into()).into();
        assert!(matches!(err, DocktorError::EventListing(_)));
    }
}
