//! Whole-run orchestration.
//!
//! Collect once, investigate and analyze every group through a bounded
//! worker pool, then assemble. Groups are independent; results keep collector
//! order regardless of completion order.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::{Analysis, Analyst, PlaceholderReason};
use crate::collector::EventCollector;
use crate::config::{DocktorConfig, StrategyKind};
use crate::error::Result;
use crate::executor::DiagnosticExecutor;
use crate::gateway::ClusterGateway;
use crate::planner::{
    CommandStrategy, DelegatedStrategy, DiagnosticPlanner, Investigation, PlaybookStrategy,
    StopReason,
};
use crate::report::{assemble, Report, ReportMeta, RunStatus};
use crate::synthesizer::AnalysisSynthesizer;

/// Conditions that make a run unsuccessful even though a report was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalCondition {
    ConnectivityLost(String),
    Interrupted,
    /// Every group's analysis failed on credentials
    SynthesisAuthFailed,
}

impl fmt::Display for FatalCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectivityLost(message) => write!(f, "cluster became unreachable: {message}"),
            Self::Interrupted => write!(f, "run was interrupted"),
            Self::SynthesisAuthFailed => {
                write!(f, "analysis service rejected credentials for every group")
            }
        }
    }
}

/// A finished run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: Report,
    pub fatal: Option<FatalCondition>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        i32::from(self.fatal.is_some())
    }
}

/// Wires collector, planner, analyst and assembler together
pub struct Pipeline {
    gateway: Arc<dyn ClusterGateway>,
    synthesizer: Arc<dyn AnalysisSynthesizer>,
    config: DocktorConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        synthesizer: Arc<dyn AnalysisSynthesizer>,
        config: DocktorConfig,
    ) -> Self {
        Self {
            gateway,
            synthesizer,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the run when cancelled; in-flight work finishes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn strategy(&self) -> Arc<dyn CommandStrategy> {
        let playbook = PlaybookStrategy::new(self.config.executor.log_tail_lines);
        match self.config.planner.strategy {
            StrategyKind::Playbook => Arc::new(playbook),
            StrategyKind::Delegated => Arc::new(DelegatedStrategy::new(
                self.synthesizer.clone(),
                playbook,
                self.config.synthesis.timeout(),
            )),
        }
    }

    /// Run once. Fails only when the initial event listing fails.
    pub async fn run(&self) -> Result<RunOutcome> {
        let collector =
            EventCollector::new(self.gateway.clone(), self.config.gateway.request_timeout());
        let collection = collector.collect().await?;

        let executor = Arc::new(DiagnosticExecutor::new(
            self.gateway.clone(),
            &self.config.executor,
        ));
        let planner = DiagnosticPlanner::new(
            executor,
            self.strategy(),
            &self.config.planner,
            self.config.executor.command_timeout(),
            self.cancel.clone(),
        );
        let analyst = Analyst::new(
            self.synthesizer.clone(),
            &self.config.synthesis,
            self.cancel.clone(),
        );

        info!(
            groups = collection.groups.len(),
            concurrency = self.config.concurrency,
            strategy = planner.strategy_name(),
            "Investigating problem groups"
        );

        let planner = &planner;
        let analyst = &analyst;
        let results: Vec<(Investigation, Analysis)> = stream::iter(collection.groups.iter())
            .map(move |group| async move {
                let investigation = planner.investigate(group).await;
                let analysis = analyst.analyze(group, &investigation).await;
                (investigation, analysis)
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;
        let (investigations, analyses): (Vec<_>, Vec<_>) = results.into_iter().unzip();

        let fatal = self.fatal_condition(&investigations, &analyses);
        let status = match &fatal {
            Some(FatalCondition::ConnectivityLost(message)) => {
                RunStatus::ConnectivityLost(message.clone())
            }
            Some(FatalCondition::Interrupted) => RunStatus::Interrupted,
            Some(FatalCondition::SynthesisAuthFailed) | None => RunStatus::Complete,
        };
        if let Some(condition) = &fatal {
            warn!("Run finished with errors: {condition}");
        }

        let report = assemble(
            collection.groups,
            investigations,
            analyses,
            ReportMeta {
                generated_at: Utc::now(),
                total_events_fetched: collection.total_fetched,
                warning_count: collection.warning_count,
                strategy: self.config.planner.strategy.as_str().to_string(),
                status,
            },
        )?;

        Ok(RunOutcome { report, fatal })
    }

    fn fatal_condition(
        &self,
        investigations: &[Investigation],
        analyses: &[Analysis],
    ) -> Option<FatalCondition> {
        let lost = investigations
            .iter()
            .find_map(|investigation| match &investigation.stop_reason {
                Some(StopReason::ConnectivityLost(message)) => Some(message.clone()),
                _ => None,
            });
        if let Some(message) = lost {
            return Some(FatalCondition::ConnectivityLost(message));
        }
        if self.cancel.is_cancelled() {
            return Some(FatalCondition::Interrupted);
        }
        let all_auth = !analyses.is_empty()
            && analyses
                .iter()
                .all(|a| a.placeholder_reason() == Some(&PlaceholderReason::AuthFailed));
        all_auth.then_some(FatalCondition::SynthesisAuthFailed)
    }
}
