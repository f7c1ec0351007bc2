//! Run configuration.
//!
//! Loaded from an optional `docktor.json`; every field has a default so an
//! empty object (or no file at all) is a valid configuration. Credentials are
//! never part of this file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default model for the analysis service
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default analysis service endpoint
pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocktorConfig {
    pub gateway: GatewayConfig,
    pub executor: ExecutorConfig,
    pub planner: PlannerConfig,
    pub synthesis: SynthesisConfig,
    /// Maximum number of groups investigated at once
    pub concurrency: usize,
    /// Directory the report file is written to
    pub output_dir: PathBuf,
}

impl Default for DocktorConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            executor: ExecutorConfig::default(),
            planner: PlannerConfig::default(),
            synthesis: SynthesisConfig::default(),
            concurrency: 3,
            output_dir: PathBuf::from("."),
        }
    }
}

/// kubectl access settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// kubectl binary to invoke
    pub kubectl: String,
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    /// Timeout for the event listing call
    pub request_timeout_secs: u64,
    /// Maximum number of events kept, most recent first
    pub event_limit: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            kubectl: "kubectl".to_string(),
            kubeconfig: None,
            context: None,
            request_timeout_secs: 30,
            event_limit: 100,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Diagnostic command execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    pub command_timeout_secs: u64,
    /// Retries for transient connectivity failures only
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    /// Captured stdout/stderr are cut at this size
    pub max_output_bytes: usize,
    /// `--tail` used for log commands
    pub log_tail_lines: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
            max_retries: 2,
            initial_backoff_ms: 1000,
            max_output_bytes: 16 * 1024,
            log_tail_lines: 100,
        }
    }
}

impl ExecutorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// How the planner picks the next command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Fixed per-reason playbook (deterministic)
    #[default]
    Playbook,
    /// Ask the analysis service for the next command
    Delegated,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playbook => "playbook",
            Self::Delegated => "delegated",
        }
    }
}

/// Investigation loop bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerConfig {
    pub max_steps: usize,
    pub max_consecutive_failures: usize,
    pub strategy: StrategyKind,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_steps: 6,
            max_consecutive_failures: 3,
            strategy: StrategyKind::Playbook,
        }
    }
}

/// Analysis service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthesisConfig {
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Retries after a rate-limit or timeout before degrading
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_tokens: u32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_API_URL.to_string(),
            timeout_secs: 60,
            max_retries: 1,
            backoff_ms: 2000,
            max_tokens: 1024,
        }
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl DocktorConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the run loop degenerate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.planner.max_steps == 0 {
            return Err(ConfigError::Invalid("planner.maxSteps must be at least 1".into()));
        }
        if self.planner.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid(
                "planner.maxConsecutiveFailures must be at least 1".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.executor.command_timeout_secs == 0
            || self.gateway.request_timeout_secs == 0
            || self.synthesis.timeout_secs == 0
        {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        Ok(())
    }
}
