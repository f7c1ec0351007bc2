//! Report assembly and Markdown rendering.
//!
//! [`assemble`] checks that every group has exactly one investigation and one
//! analysis. Rendering is a pure function of the [`Report`] value.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::analysis::Analysis;
use crate::collector::ProblemGroup;
use crate::error::AssemblyError;
use crate::executor::DiagnosticStep;
use crate::planner::Investigation;

/// How the run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Complete,
    ConnectivityLost(String),
    Interrupted,
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "complete"),
            Self::ConnectivityLost(message) => write!(f, "aborted, cluster unreachable ({message})"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Run-level facts that are not per group
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub generated_at: DateTime<Utc>,
    pub total_events_fetched: usize,
    pub warning_count: usize,
    pub strategy: String,
    pub status: RunStatus,
}

/// One problem group with its evidence and analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub group: ProblemGroup,
    pub investigation: Investigation,
    pub analysis: Analysis,
}

impl GroupReport {
    pub fn is_incomplete(&self) -> bool {
        !self.investigation.is_complete()
    }
}

/// The assembled report. Never mutated after [`assemble`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub total_events_fetched: usize,
    pub warning_count: usize,
    pub strategy: String,
    pub status: RunStatus,
    /// Collector order
    pub groups: Vec<GroupReport>,
}

/// Zip groups with their investigations and analyses.
pub fn assemble(
    groups: Vec<ProblemGroup>,
    investigations: Vec<Investigation>,
    analyses: Vec<Analysis>,
    meta: ReportMeta,
) -> Result<Report, AssemblyError> {
    if investigations.len() != groups.len() || analyses.len() != groups.len() {
        return Err(AssemblyError::LengthMismatch {
            groups: groups.len(),
            investigations: investigations.len(),
            analyses: analyses.len(),
        });
    }

    let groups = groups
        .into_iter()
        .zip(investigations)
        .zip(analyses)
        .map(|((group, investigation), analysis)| {
            if analysis.problem_group_key != *group.key() {
                return Err(AssemblyError::KeyMismatch {
                    expected: group.key().to_string(),
                    found: analysis.problem_group_key.to_string(),
                });
            }
            Ok(GroupReport {
                group,
                investigation,
                analysis,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Report {
        generated_at: meta.generated_at,
        total_events_fetched: meta.total_events_fetched,
        warning_count: meta.warning_count,
        strategy: meta.strategy,
        status: meta.status,
        groups,
    })
}

impl Report {
    /// Groups in presentation order: namespaces sorted, collector order within.
    pub fn ordered_groups(&self) -> Vec<&GroupReport> {
        let mut ordered: Vec<&GroupReport> = self.groups.iter().collect();
        // stable, so collector order survives within a namespace
        ordered.sort_by(|a, b| a.group.key().namespace.cmp(&b.group.key().namespace));
        ordered
    }

    /// Deduplicated recommendations of synthesized analyses, first seen first.
    pub fn recommendations(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.ordered_groups()
            .into_iter()
            .filter(|g| !g.analysis.is_placeholder())
            .flat_map(|g| g.analysis.recommendations.iter())
            .map(|r| r.trim())
            .filter(|r| !r.is_empty() && seen.insert(*r))
            .collect()
    }

    pub fn command_count(&self) -> usize {
        self.groups.iter().map(|g| g.investigation.steps.len()).sum()
    }

    pub fn incomplete_count(&self) -> usize {
        self.groups.iter().filter(|g| g.is_incomplete()).count()
    }

    pub fn placeholder_count(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| g.analysis.is_placeholder())
            .count()
    }

    /// Render as Markdown.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

fn namespace_label(namespace: &str) -> &str {
    if namespace.is_empty() {
        "(cluster-scoped)"
    } else {
        namespace
    }
}

/// A backtick fence longer than any backtick run in `content`
fn fence_for(content: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in content.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

/// Joins the lines of `text` so it stays inside one Markdown list item
fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn write_block(f: &mut fmt::Formatter<'_>, lang: &str, content: &str) -> fmt::Result {
    let fence = fence_for(content);
    writeln!(f, "{fence}{lang}")?;
    writeln!(f, "{}", content.trim_end())?;
    writeln!(f, "{fence}")?;
    writeln!(f)
}

fn write_step(
    f: &mut fmt::Formatter<'_>,
    number: usize,
    owner: &GroupReport,
    step: &DiagnosticStep,
) -> fmt::Result {
    writeln!(f, "### Command {number}")?;
    writeln!(f)?;
    writeln!(f, "*For: {}*", owner.group.key())?;
    writeln!(f)?;
    write_block(f, "bash", &step.display_command())?;
    if step.timed_out() {
        writeln!(f, "**Exit code:** {} (timed out)", step.exit_code)?;
    } else {
        writeln!(
            f,
            "**Exit code:** {} ({} ms, attempt {})",
            step.exit_code, step.duration_ms, step.attempt
        )?;
    }
    writeln!(f)?;
    writeln!(f, "**Output:**")?;
    write_block(f, "", &step.stdout)?;
    if !step.stderr.trim().is_empty() {
        writeln!(f, "**Errors:**")?;
        write_block(f, "", &step.stderr)?;
    }
    Ok(())
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ordered = self.ordered_groups();

        writeln!(f, "# Kubernetes Cluster Analysis Report")?;
        writeln!(f)?;
        writeln!(
            f,
            "**Generated on:** {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(f)?;

        // Executive Summary
        writeln!(f, "## Executive Summary")?;
        writeln!(f)?;
        writeln!(f, "Total events analyzed: {}", self.total_events_fetched)?;
        writeln!(f, "Warning events found: {}", self.warning_count)?;
        writeln!(f, "Problem groups: {}", self.groups.len())?;
        writeln!(f, "Diagnostic commands executed: {}", self.command_count())?;
        writeln!(f, "Investigation strategy: {}", self.strategy)?;
        writeln!(f)?;
        if !self.status.is_complete() || self.incomplete_count() > 0 {
            writeln!(
                f,
                "> **Partial report:** run {}. {} of {} problem groups were not fully investigated.",
                self.status,
                self.incomplete_count(),
                self.groups.len()
            )?;
            writeln!(f)?;
        }
        if self.placeholder_count() > 0 {
            writeln!(
                f,
                "> **Degraded analysis:** {} of {} problem groups have no automated analysis.",
                self.placeholder_count(),
                self.groups.len()
            )?;
            writeln!(f)?;
        }

        // Events Overview
        writeln!(f, "## Events Overview")?;
        writeln!(f)?;
        if ordered.is_empty() {
            writeln!(f, "### No Warning Events Found")?;
            writeln!(f)?;
            writeln!(
                f,
                "The cluster appears to be healthy with no warning events detected."
            )?;
            writeln!(f)?;
        }
        let mut current_namespace: Option<&str> = None;
        for (i, entry) in ordered.iter().enumerate() {
            let key = entry.group.key();
            if current_namespace != Some(key.namespace.as_str()) {
                writeln!(f, "### Namespace `{}`", namespace_label(&key.namespace))?;
                writeln!(f)?;
                current_namespace = Some(key.namespace.as_str());
            }
            write!(f, "**{}. {}** on {} `{}`", i + 1, key.reason, key.kind, key.name)?;
            if entry.is_incomplete() {
                write!(f, " **[INCOMPLETE: {}]**", entry.investigation.state.as_str())?;
            }
            writeln!(f)?;
            writeln!(f)?;
            writeln!(
                f,
                "- **Message:** {}",
                single_line(&entry.group.latest().message)
            )?;
            writeln!(
                f,
                "- **Count:** {} across {} events",
                entry.group.aggregate_count(),
                entry.group.events().len()
            )?;
            writeln!(f, "- **First Seen:** {}", entry.group.first_seen().to_rfc3339())?;
            writeln!(f, "- **Last Seen:** {}", entry.group.last_seen().to_rfc3339())?;
            write!(
                f,
                "- **Investigation:** {}, {} commands",
                entry.investigation.state.as_str(),
                entry.investigation.steps.len()
            )?;
            if let Some(reason) = &entry.investigation.stop_reason {
                write!(f, " ({reason})")?;
            }
            writeln!(f)?;
            writeln!(f)?;
        }

        // AI Analysis
        writeln!(f, "## AI Analysis")?;
        writeln!(f)?;
        for (i, entry) in ordered.iter().enumerate() {
            writeln!(f, "### Analysis {}: {}", i + 1, entry.group.key())?;
            writeln!(f)?;
            if let Some(reason) = entry.analysis.placeholder_reason() {
                writeln!(f, "*Placeholder ({reason})*")?;
                writeln!(f)?;
            }
            writeln!(f, "{}", entry.analysis.narrative.trim())?;
            writeln!(f)?;
            if !entry.analysis.recommendations.is_empty() {
                for rec in &entry.analysis.recommendations {
                    writeln!(f, "- {}", single_line(rec))?;
                }
                writeln!(f)?;
            }
        }

        // Commands Executed
        writeln!(f, "## Commands Executed")?;
        writeln!(f)?;
        let mut number = 0;
        for entry in &ordered {
            for step in &entry.investigation.steps {
                number += 1;
                write_step(f, number, entry, step)?;
            }
        }
        if number == 0 {
            writeln!(f, "No diagnostic commands were executed.")?;
            writeln!(f)?;
        }
        let rejected: Vec<_> = ordered
            .iter()
            .flat_map(|entry| entry.investigation.rejected.iter().map(move |r| (*entry, r)))
            .collect();
        if !rejected.is_empty() {
            writeln!(f, "### Rejected Commands (not executed)")?;
            writeln!(f)?;
            for (entry, r) in rejected {
                writeln!(
                    f,
                    "- `{}` for {}: {}",
                    crate::executor::display_command(&r.command),
                    entry.group.key(),
                    r.reason
                )?;
            }
            writeln!(f)?;
        }

        // Recommendations
        writeln!(f, "## Recommendations")?;
        writeln!(f)?;
        let recommendations = self.recommendations();
        if recommendations.is_empty() {
            writeln!(
                f,
                "No automated recommendations were produced. Review the analyses and command output above."
            )?;
            writeln!(f)?;
        } else {
            for (i, rec) in recommendations.iter().enumerate() {
                writeln!(f, "{}. {}", i + 1, single_line(rec))?;
            }
            writeln!(f)?;
        }

        writeln!(f, "## Generated by Docktor")?;
        writeln!(f, "*Kubernetes Cluster Analysis Tool*")
    }
}

/// `cluster-analysis-YYYYMMDD-HHMMSS.md`
pub fn report_filename(generated_at: DateTime<Utc>) -> String {
    format!(
        "cluster-analysis-{}.md",
        generated_at.format("%Y%m%d-%H%M%S")
    )
}

/// Write the rendered report into `dir`, refusing to overwrite an existing file.
pub fn write_report(report: &Report, dir: &Path) -> std::io::Result<PathBuf> {
    let path = dir.join(report_filename(report.generated_at));
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)?;
    file.write_all(report.render().as_bytes())?;
    file.sync_all()?;
    Ok(path)
}

/// Short plain-text summary for the terminal.
pub fn summary_line(report: &Report) -> String {
    let summary = format!(
        "{} problem groups, {} commands, {} placeholder analyses",
        report.groups.len(),
        report.command_count(),
        report.placeholder_count()
    );
    match report.incomplete_count() {
        0 => summary,
        n => format!("{summary}, {n} incomplete"),
    }
}
