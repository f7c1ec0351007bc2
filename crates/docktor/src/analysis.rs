//! Per-group analysis with bounded retry and graceful degradation.
//!
//! Whatever the synthesizer does, every group ends up with a well-formed
//! [`Analysis`]. Failures degrade to a placeholder with an explanatory
//! narrative and no recommendations.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::{GroupKey, ProblemGroup};
use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use crate::planner::Investigation;
use crate::synthesizer::{AnalysisSynthesizer, SynthesisRequest};

/// Upper bound on a server-requested retry delay
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Why a group carries a placeholder instead of a synthesized analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlaceholderReason {
    RateLimited,
    AuthFailed,
    /// No API key was supplied
    NotConfigured,
    TimedOut,
    Unavailable(String),
    InvestigationIncomplete,
    Cancelled,
}

impl fmt::Display for PlaceholderReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "the analysis service kept rate limiting requests"),
            Self::AuthFailed => write!(f, "the analysis service rejected the configured credentials"),
            Self::NotConfigured => write!(f, "no analysis service credentials were configured"),
            Self::TimedOut => write!(f, "the analysis service timed out"),
            Self::Unavailable(reason) => write!(f, "the analysis service failed: {reason}"),
            Self::InvestigationIncomplete => {
                write!(f, "the investigation of this problem did not complete")
            }
            Self::Cancelled => write!(f, "the run was cancelled before analysis"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AnalysisStatus {
    Synthesized,
    Placeholder(PlaceholderReason),
}

/// Root-cause analysis for one problem group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub problem_group_key: GroupKey,
    pub narrative: String,
    pub recommendations: Vec<String>,
    pub status: AnalysisStatus,
}

impl Analysis {
    /// Degraded analysis: explanatory narrative, no recommendations.
    pub fn placeholder(key: &GroupKey, reason: PlaceholderReason) -> Self {
        Self {
            problem_group_key: key.clone(),
            narrative: format!(
                "Automated analysis unavailable: {reason}. Review the diagnostic commands below manually."
            ),
            recommendations: Vec::new(),
            status: AnalysisStatus::Placeholder(reason),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.status, AnalysisStatus::Placeholder(_))
    }

    pub fn placeholder_reason(&self) -> Option<&PlaceholderReason> {
        match &self.status {
            AnalysisStatus::Placeholder(reason) => Some(reason),
            AnalysisStatus::Synthesized => None,
        }
    }
}

fn placeholder_for(err: &SynthesisError) -> PlaceholderReason {
    match err {
        SynthesisError::RateLimited { .. } => PlaceholderReason::RateLimited,
        SynthesisError::Timeout => PlaceholderReason::TimedOut,
        SynthesisError::NotConfigured => PlaceholderReason::NotConfigured,
        e if e.is_auth() => PlaceholderReason::AuthFailed,
        e => PlaceholderReason::Unavailable(e.to_string()),
    }
}

/// Wraps a synthesizer with the retry and degradation policy
pub struct Analyst {
    synthesizer: Arc<dyn AnalysisSynthesizer>,
    max_retries: u32,
    backoff: Duration,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Analyst {
    pub fn new(
        synthesizer: Arc<dyn AnalysisSynthesizer>,
        config: &SynthesisConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            synthesizer,
            max_retries: config.max_retries,
            backoff: config.backoff(),
            timeout: config.timeout(),
            cancel,
        }
    }

    /// Produce the analysis for a group. Never fails.
    pub async fn analyze(&self, group: &ProblemGroup, investigation: &Investigation) -> Analysis {
        let key = group.key();
        if !investigation.is_complete() {
            return Analysis::placeholder(key, PlaceholderReason::InvestigationIncomplete);
        }

        let request = SynthesisRequest {
            group,
            steps: &investigation.steps,
        };
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Analysis::placeholder(key, PlaceholderReason::Cancelled);
            }

            let result =
                match tokio::time::timeout(self.timeout, self.synthesizer.synthesize(&request))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SynthesisError::Timeout),
                };

            let err = match result {
                Ok(analysis) if !analysis.narrative.trim().is_empty() => {
                    info!(group = %key, recommendations = analysis.recommendations.len(), "Analysis synthesized");
                    return Analysis {
                        problem_group_key: key.clone(),
                        narrative: analysis.narrative,
                        recommendations: analysis.recommendations,
                        status: AnalysisStatus::Synthesized,
                    };
                }
                Ok(_) => SynthesisError::InvalidResponse("empty narrative".into()),
                Err(e) => e,
            };

            if !err.is_transient() || attempt >= self.max_retries {
                warn!(group = %key, error = %err, "Analysis degraded to placeholder");
                return Analysis::placeholder(key, placeholder_for(&err));
            }

            attempt += 1;
            let delay = match &err {
                SynthesisError::RateLimited {
                    retry_after_secs: Some(secs),
                } => Duration::from_secs(*secs).min(MAX_RETRY_DELAY),
                _ => self.backoff * 2u32.saturating_pow(attempt - 1),
            };
            debug!(group = %key, attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying analysis");

            tokio::select! {
                () = sleep(delay) => {}
                () = self.cancel.cancelled() => {
                    return Analysis::placeholder(key, PlaceholderReason::Cancelled);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::group_events;
    use crate::executor::DiagnosticStep;
    use crate::k8s::{EventType, InvolvedObject, RawEvent};
    use crate::planner::InvestigationState;
    use crate::synthesizer::{CommandProposal, SynthesizedAnalysis};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<Result<SynthesizedAnalysis, SynthesisError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<SynthesizedAnalysis, SynthesisError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl AnalysisSynthesizer for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn synthesize(
            &self,
            _: &SynthesisRequest<'_>,
        ) -> Result<SynthesizedAnalysis, SynthesisError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(SynthesisError::Timeout))
        }

        async fn propose_next_command(
            &self,
            _: &ProblemGroup,
            _: &[DiagnosticStep],
        ) -> Result<CommandProposal, SynthesisError> {
            Ok(CommandProposal::Sufficient)
        }
    }

    fn group() -> ProblemGroup {
        let now = Utc::now();
        group_events(vec![RawEvent {
            event_type: EventType::Warning,
            reason: "OOMKilled".into(),
            message: "Container app was OOM killed".into(),
            involved_object: InvolvedObject {
                kind: "Pod".into(),
                name: "api-0".into(),
                namespace: "prod".into(),
            },
            count: 2,
            first_seen: now,
            last_seen: now,
        }])
        .remove(0)
    }

    fn finished() -> Investigation {
        Investigation {
            state: InvestigationState::Sufficient,
            ..Investigation::pending()
        }
    }

    fn analyst(synth: Arc<Scripted>) -> Analyst {
        Analyst::new(synth, &SynthesisConfig::default(), CancellationToken::new())
    }

    fn ok(narrative: &str) -> Result<SynthesizedAnalysis, SynthesisError> {
        Ok(SynthesizedAnalysis {
            narrative: narrative.into(),
            recommendations: vec!["Raise the memory limit".into()],
        })
    }

    #[tokio::test]
    async fn test_synthesized_analysis() {
        let synth = Scripted::new(vec![ok("Memory limit too low")]);
        let analysis = analyst(synth.clone()).analyze(&group(), &finished()).await;
        assert_eq!(analysis.status, AnalysisStatus::Synthesized);
        assert_eq!(analysis.recommendations.len(), 1);
        assert_eq!(analysis.problem_group_key.reason, "OOMKilled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_twice_degrades() {
        let synth = Scripted::new(vec![Err(SynthesisError::Timeout), Err(SynthesisError::Timeout)]);
        let analysis = analyst(synth.clone()).analyze(&group(), &finished()).await;
        assert_eq!(synth.calls(), 2);
        assert_eq!(
            analysis.placeholder_reason(),
            Some(&PlaceholderReason::TimedOut)
        );
        assert!(analysis.recommendations.is_empty());
        assert!(!analysis.narrative.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_success() {
        let synth = Scripted::new(vec![
            Err(SynthesisError::RateLimited {
                retry_after_secs: Some(5),
            }),
            ok("Recovered"),
        ]);
        let started = tokio::time::Instant::now();
        let analysis = analyst(synth.clone()).analyze(&group(), &finished()).await;
        assert!(!analysis.is_placeholder());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_rate_limit_degrades() {
        let config = SynthesisConfig::default();
        let replies = (0..=config.max_retries)
            .map(|_| {
                Err(SynthesisError::RateLimited {
                    retry_after_secs: None,
                })
            })
            .collect();
        let synth = Scripted::new(replies);
        let analysis = analyst(synth.clone()).analyze(&group(), &finished()).await;

        assert_eq!(synth.calls(), config.max_retries + 1);
        assert_eq!(
            analysis.placeholder_reason(),
            Some(&PlaceholderReason::RateLimited)
        );
        assert!(analysis.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_an_auth_failure() {
        let synth = Scripted::new(vec![Err(SynthesisError::NotConfigured)]);
        let analysis = analyst(synth.clone()).analyze(&group(), &finished()).await;
        assert_eq!(synth.calls(), 1);
        assert_eq!(
            analysis.placeholder_reason(),
            Some(&PlaceholderReason::NotConfigured)
        );
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let synth = Scripted::new(vec![Err(SynthesisError::Auth("invalid x-api-key".into()))]);
        let analysis = analyst(synth.clone()).analyze(&group(), &finished()).await;
        assert_eq!(synth.calls(), 1);
        assert_eq!(
            analysis.placeholder_reason(),
            Some(&PlaceholderReason::AuthFailed)
        );
    }

    #[tokio::test]
    async fn test_incomplete_investigation_skips_synthesis() {
        let synth = Scripted::new(vec![ok("unused")]);
        let mut investigation = Investigation::pending();
        investigation.state = InvestigationState::Investigating;
        let analysis = analyst(synth.clone()).analyze(&group(), &investigation).await;
        assert_eq!(synth.calls(), 0);
        assert_eq!(
            analysis.placeholder_reason(),
            Some(&PlaceholderReason::InvestigationIncomplete)
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_makes_no_calls() {
        let synth = Scripted::new(vec![ok("unused")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let analysis = Analyst::new(synth.clone(), &SynthesisConfig::default(), cancel)
            .analyze(&group(), &finished())
            .await;
        assert_eq!(synth.calls(), 0);
        assert_eq!(
            analysis.placeholder_reason(),
            Some(&PlaceholderReason::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_empty_narrative_is_placeholder() {
        let synth = Scripted::new(vec![ok("   ")]);
        let analysis = analyst(synth).analyze(&group(), &finished()).await;
        assert!(matches!(
            analysis.placeholder_reason(),
            Some(PlaceholderReason::Unavailable(_))
        ));
    }
}
