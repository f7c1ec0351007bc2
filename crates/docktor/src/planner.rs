//! Diagnostic planner: the bounded evidence-gathering loop per problem group.
//!
//! Command selection is delegated to a [`CommandStrategy`]; budget,
//! failure counting and termination live here so they behave identically for
//! every strategy.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::ProblemGroup;
use crate::config::PlannerConfig;
use crate::error::{ExecutorError, PolicyViolation, SynthesisError};
use crate::executor::{display_command, DiagnosticExecutor, DiagnosticStep};
use crate::playbook;
use crate::synthesizer::{AnalysisSynthesizer, CommandProposal};

/// Lifecycle of one group's investigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InvestigationState {
    Pending,
    Investigating,
    /// Budget or failure limit reached
    Exhausted,
    /// The strategy has no further command to run
    Sufficient,
}

impl InvestigationState {
    /// Terminal states proceed to analysis with their evidence.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Exhausted | Self::Sufficient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Investigating => "Investigating",
            Self::Exhausted => "Exhausted",
            Self::Sufficient => "Sufficient",
        }
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    EvidenceSufficient,
    /// The strategy proposed a command that already ran
    RepeatedCommand,
    StepBudget,
    ConsecutiveFailures,
    Cancelled,
    ConnectivityLost(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EvidenceSufficient => write!(f, "sufficient evidence gathered"),
            Self::RepeatedCommand => write!(f, "no new command to run"),
            Self::StepBudget => write!(f, "step budget exhausted"),
            Self::ConsecutiveFailures => write!(f, "too many consecutive failed steps"),
            Self::Cancelled => write!(f, "run cancelled"),
            Self::ConnectivityLost(message) => write!(f, "cluster unreachable: {message}"),
        }
    }
}

/// A selection refused by the allow-list. Never dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedCommand {
    pub command: Vec<String>,
    pub reason: String,
}

/// Evidence gathered for one problem group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Investigation {
    pub state: InvestigationState,
    pub stop_reason: Option<StopReason>,
    pub steps: Vec<DiagnosticStep>,
    pub rejected: Vec<RejectedCommand>,
}

impl Investigation {
    /// An investigation that never started.
    pub fn pending() -> Self {
        Self {
            state: InvestigationState::Pending,
            stop_reason: None,
            steps: Vec::new(),
            rejected: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    fn has_run(&self, command: &[String]) -> bool {
        self.steps.iter().any(|step| step.command == command)
            || self.rejected.iter().any(|r| r.command == command)
    }
}

/// What a strategy sees when picking the next command
pub struct InvestigationContext<'a> {
    pub group: &'a ProblemGroup,
    pub steps: &'a [DiagnosticStep],
}

impl InvestigationContext<'_> {
    fn executed(&self, command: &[String]) -> bool {
        self.steps.iter().any(|step| step.command == command)
    }
}

/// Outcome of one selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Run(Vec<String>),
    Sufficient,
}

/// Picks the next diagnostic command for a group
#[async_trait]
pub trait CommandStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn next_command(&self, ctx: &InvestigationContext<'_>) -> Selection;
}

/// Deterministic per-reason playbook
#[derive(Debug, Clone, Copy)]
pub struct PlaybookStrategy {
    log_tail: u32,
}

impl PlaybookStrategy {
    pub fn new(log_tail: u32) -> Self {
        Self { log_tail }
    }

    /// First playbook command that has not run yet.
    pub fn select(&self, ctx: &InvestigationContext<'_>) -> Selection {
        playbook::commands_for(ctx.group.key(), self.log_tail)
            .into_iter()
            .find(|command| !ctx.executed(command))
            .map_or(Selection::Sufficient, Selection::Run)
    }
}

#[async_trait]
impl CommandStrategy for PlaybookStrategy {
    fn name(&self) -> &'static str {
        "playbook"
    }

    async fn next_command(&self, ctx: &InvestigationContext<'_>) -> Selection {
        self.select(ctx)
    }
}

/// Asks the analysis service for the next command, falling back to the
/// playbook when it cannot answer
pub struct DelegatedStrategy {
    synthesizer: Arc<dyn AnalysisSynthesizer>,
    fallback: PlaybookStrategy,
    timeout: Duration,
}

impl DelegatedStrategy {
    /// `timeout` bounds each proposal call; an elapsed call falls back too.
    pub fn new(
        synthesizer: Arc<dyn AnalysisSynthesizer>,
        fallback: PlaybookStrategy,
        timeout: Duration,
    ) -> Self {
        Self {
            synthesizer,
            fallback,
            timeout,
        }
    }
}

#[async_trait]
impl CommandStrategy for DelegatedStrategy {
    fn name(&self) -> &'static str {
        "delegated"
    }

    async fn next_command(&self, ctx: &InvestigationContext<'_>) -> Selection {
        let proposal = tokio::time::timeout(
            self.timeout,
            self.synthesizer.propose_next_command(ctx.group, ctx.steps),
        )
        .await
        .unwrap_or(Err(SynthesisError::Timeout));

        match proposal {
            Ok(CommandProposal::Run(command)) => Selection::Run(command),
            Ok(CommandProposal::Sufficient) => Selection::Sufficient,
            Err(e) => {
                warn!(
                    group = %ctx.group.key(),
                    error = %e,
                    "Command proposal failed, using playbook"
                );
                self.fallback.select(ctx)
            }
        }
    }
}

/// Drives the select/execute loop for one group at a time
pub struct DiagnosticPlanner {
    executor: Arc<DiagnosticExecutor>,
    strategy: Arc<dyn CommandStrategy>,
    max_steps: usize,
    max_consecutive_failures: usize,
    command_timeout: Duration,
    cancel: CancellationToken,
}

impl DiagnosticPlanner {
    pub fn new(
        executor: Arc<DiagnosticExecutor>,
        strategy: Arc<dyn CommandStrategy>,
        config: &PlannerConfig,
        command_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            strategy,
            max_steps: config.max_steps,
            max_consecutive_failures: config.max_consecutive_failures,
            command_timeout,
            cancel,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Gather evidence for `group`.
    ///
    /// Never fails: command errors and policy violations are recorded, and a
    /// lost cluster cancels the run and leaves the group `Investigating`.
    pub async fn investigate(&self, group: &ProblemGroup) -> Investigation {
        let mut investigation = Investigation::pending();
        if self.cancel.is_cancelled() {
            return investigation;
        }
        investigation.state = InvestigationState::Investigating;
        debug!(group = %group.key(), strategy = self.strategy.name(), "Investigating");

        let mut consecutive_failures = 0;
        // Every iteration counts against the budget, rejected selections included
        for _ in 0..self.max_steps {
            if self.cancel.is_cancelled() {
                investigation.stop_reason = Some(StopReason::Cancelled);
                return investigation;
            }

            let selection = {
                let ctx = InvestigationContext {
                    group,
                    steps: &investigation.steps,
                };
                self.strategy.next_command(&ctx).await
            };

            let command = match selection {
                Selection::Sufficient => {
                    return finish(
                        investigation,
                        InvestigationState::Sufficient,
                        StopReason::EvidenceSufficient,
                    );
                }
                Selection::Run(command) => command,
            };

            let normalized = self
                .executor
                .policy()
                .check(&command)
                .unwrap_or_else(|_| command.clone());
            if investigation.has_run(&normalized) {
                debug!(group = %group.key(), command = %display_command(&normalized), "Repeated command");
                return finish(
                    investigation,
                    InvestigationState::Sufficient,
                    StopReason::RepeatedCommand,
                );
            }

            // A selection that raced with cancellation is dropped, not dispatched
            if self.cancel.is_cancelled() {
                investigation.stop_reason = Some(StopReason::Cancelled);
                return investigation;
            }

            match self.executor.execute(&command, self.command_timeout).await {
                Ok(step) => {
                    if step.succeeded() {
                        consecutive_failures = 0;
                    } else {
                        consecutive_failures += 1;
                    }
                    investigation.steps.push(step);
                }
                Err(ExecutorError::Policy(violation)) => {
                    warn!(
                        group = %group.key(),
                        command = %display_command(&command),
                        %violation,
                        "Rejected diagnostic command"
                    );
                    consecutive_failures += 1;
                    investigation.rejected.push(rejection(command, &violation));
                }
                Err(ExecutorError::Connectivity { attempts, message }) => {
                    warn!(group = %group.key(), attempts, "Cluster unreachable, cancelling run");
                    self.cancel.cancel();
                    investigation.stop_reason = Some(StopReason::ConnectivityLost(message));
                    return investigation;
                }
            }

            if consecutive_failures >= self.max_consecutive_failures {
                return finish(
                    investigation,
                    InvestigationState::Exhausted,
                    StopReason::ConsecutiveFailures,
                );
            }
        }

        finish(
            investigation,
            InvestigationState::Exhausted,
            StopReason::StepBudget,
        )
    }
}

fn rejection(command: Vec<String>, violation: &PolicyViolation) -> RejectedCommand {
    RejectedCommand {
        command,
        reason: violation.to_string(),
    }
}

fn finish(
    mut investigation: Investigation,
    state: InvestigationState,
    reason: StopReason,
) -> Investigation {
    info!(
        steps = investigation.steps.len(),
        state = state.as_str(),
        "Investigation finished: {reason}"
    );
    investigation.state = state;
    investigation.stop_reason = Some(reason);
    investigation
}
