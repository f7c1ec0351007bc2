//! Prompt templates for the analysis service.

use handlebars::Handlebars;
use serde::Serialize;

use crate::collector::ProblemGroup;
use crate::error::SynthesisError;
use crate::executor::DiagnosticStep;
use crate::policy::READ_ONLY_VERBS;

/// Events quoted per group; the rest are summarized by count
const MAX_QUOTED_EVENTS: usize = 5;

/// Serializable view of a problem group
#[derive(Debug, Serialize)]
struct GroupView {
    namespace: String,
    kind: String,
    name: String,
    reason: String,
    aggregate_count: u64,
    first_seen: String,
    last_seen: String,
    messages: Vec<String>,
    omitted_events: usize,
}

impl GroupView {
    fn of(group: &ProblemGroup) -> Self {
        let key = group.key();
        let events = group.events();
        let quoted = events.iter().rev().take(MAX_QUOTED_EVENTS);
        Self {
            namespace: if key.namespace.is_empty() {
                "(cluster)".to_string()
            } else {
                key.namespace.clone()
            },
            kind: key.kind.clone(),
            name: key.name.clone(),
            reason: key.reason.clone(),
            aggregate_count: group.aggregate_count(),
            first_seen: group.first_seen().to_rfc3339(),
            last_seen: group.last_seen().to_rfc3339(),
            messages: quoted.map(|e| e.message.clone()).collect(),
            omitted_events: events.len().saturating_sub(MAX_QUOTED_EVENTS),
        }
    }
}

#[derive(Debug, Serialize)]
struct StepView {
    index: usize,
    command: String,
    exit_code: i32,
    stdout: String,
    stderr: String,
}

fn transcript(steps: &[DiagnosticStep]) -> Vec<StepView> {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| StepView {
            index: i + 1,
            command: step.display_command(),
            exit_code: step.exit_code,
            stdout: step.stdout.clone(),
            stderr: step.stderr.clone(),
        })
        .collect()
}

#[derive(Serialize)]
struct PromptData {
    group: GroupView,
    steps: Vec<StepView>,
    verbs: String,
}

/// Renders the analysis and next-command prompts
pub struct PromptTemplates {
    handlebars: Handlebars<'static>,
}

impl PromptTemplates {
    pub fn new() -> Result<Self, SynthesisError> {
        let mut handlebars = Handlebars::new();
        // Prompts are plain text; HTML escaping would mangle command output
        handlebars.register_escape_fn(handlebars::no_escape);

        for (name, template) in [
            ("system", SYSTEM_TEMPLATE),
            ("analysis", ANALYSIS_TEMPLATE),
            ("next_command", NEXT_COMMAND_TEMPLATE),
        ] {
            handlebars
                .register_template_string(name, template)
                .map_err(|e| SynthesisError::Prompt(e.to_string()))?;
        }

        Ok(Self { handlebars })
    }

    pub fn system(&self) -> Result<String, SynthesisError> {
        self.render("system", &serde_json::json!({}))
    }

    /// Root-cause analysis prompt for a group and its transcript.
    pub fn analysis(
        &self,
        group: &ProblemGroup,
        steps: &[DiagnosticStep],
    ) -> Result<String, SynthesisError> {
        self.render("analysis", &data(group, steps))
    }

    /// Prompt asking for the next read-only command.
    pub fn next_command(
        &self,
        group: &ProblemGroup,
        steps: &[DiagnosticStep],
    ) -> Result<String, SynthesisError> {
        self.render("next_command", &data(group, steps))
    }

    fn render<T: Serialize>(&self, template: &str, data: &T) -> Result<String, SynthesisError> {
        self.handlebars
            .render(template, data)
            .map_err(|e| SynthesisError::Prompt(e.to_string()))
    }
}

fn data(group: &ProblemGroup, steps: &[DiagnosticStep]) -> PromptData {
    PromptData {
        group: GroupView::of(group),
        steps: transcript(steps),
        verbs: READ_ONLY_VERBS.join(", "),
    }
}

const SYSTEM_TEMPLATE: &str = r"You are a Kubernetes site reliability engineer triaging Warning events.
You only ever recommend read-only inspection commands for diagnosis. Base every
conclusion on the evidence provided and say so when the evidence is inconclusive.
Always answer with a single JSON object and nothing else.";

const ANALYSIS_TEMPLATE: &str = r#"## Problem
Reason: {{group.reason}}
Object: {{group.kind}} {{group.name}}
Namespace: {{group.namespace}}
Occurrences: {{group.aggregate_count}} (first seen {{group.first_seen}}, last seen {{group.last_seen}})

## Recent event messages
{{#each group.messages}}
- {{this}}
{{/each}}
{{#if group.omitted_events}}
({{group.omitted_events}} older events omitted)
{{/if}}

## Diagnostic transcript
{{#each steps}}
### Step {{index}}: {{command}} (exit code {{exit_code}})
stdout:
{{stdout}}
stderr:
{{stderr}}

{{else}}
No diagnostic commands were run.
{{/each}}

## Task
Identify the most likely root cause and the remediation steps an operator
should take. Respond with JSON:
{
  "narrative": "<root-cause analysis in a few short paragraphs>",
  "recommendations": ["<one concrete action per entry, most important first>"]
}
"#;

const NEXT_COMMAND_TEMPLATE: &str = r#"## Problem
Reason: {{group.reason}}
Object: {{group.kind}} {{group.name}}
Namespace: {{group.namespace}}
Occurrences: {{group.aggregate_count}}

## Recent event messages
{{#each group.messages}}
- {{this}}
{{/each}}

## Commands already run
{{#each steps}}
### Step {{index}}: {{command}} (exit code {{exit_code}})
stdout:
{{stdout}}
stderr:
{{stderr}}

{{else}}
None yet.
{{/each}}

## Task
Choose the single next kubectl command that would best narrow down the root
cause. Allowed verbs: {{verbs}}. Never repeat a command that already ran. Do not
pass --kubeconfig, --context or watch/follow flags.

Respond with JSON, either
{"sufficient": false, "command": ["<verb>", "<arg>", "..."]}
or, when the evidence above is enough to explain the problem,
{"sufficient": true}
"#;
