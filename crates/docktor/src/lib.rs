//! Docktor: Kubernetes incident triage.
//!
//! Collects cluster Warning events, groups them into problems, runs
//! read-only diagnostic commands against each one, asks an analysis service
//! for a root-cause narrative and writes a single Markdown report.

pub mod analysis;
pub mod collector;
pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod k8s;
pub mod pipeline;
pub mod planner;
pub mod playbook;
pub mod policy;
pub mod prompts;
pub mod redact;
pub mod report;
pub mod synthesizer;

pub use config::DocktorConfig;
pub use error::{DocktorError, Result};
pub use pipeline::{FatalCondition, Pipeline, RunOutcome};
pub use report::{write_report, Report};
