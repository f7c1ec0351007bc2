//! Analysis synthesizer: the external reasoning service.
//!
//! [`AnalysisSynthesizer`] is the narrow seam the pipeline depends on. The
//! production implementation talks to the Anthropic Messages API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collector::ProblemGroup;
use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use crate::executor::DiagnosticStep;
use crate::prompts::PromptTemplates;

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Input for one root-cause analysis
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub group: &'a ProblemGroup,
    pub steps: &'a [DiagnosticStep],
}

/// Narrative and recommendations as returned by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedAnalysis {
    pub narrative: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// The service's answer to "what should run next"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandProposal {
    Run(Vec<String>),
    Sufficient,
}

/// External reasoning service
#[async_trait]
pub trait AnalysisSynthesizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Turn gathered evidence into a narrative and recommendations.
    async fn synthesize(
        &self,
        request: &SynthesisRequest<'_>,
    ) -> Result<SynthesizedAnalysis, SynthesisError>;

    /// Propose the next diagnostic command for a group.
    async fn propose_next_command(
        &self,
        group: &ProblemGroup,
        steps: &[DiagnosticStep],
    ) -> Result<CommandProposal, SynthesisError>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// `command` may come back as tokens or as a single command line
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandField {
    Tokens(Vec<String>),
    Line(String),
}

#[derive(Debug, Deserialize)]
struct ProposalPayload {
    #[serde(default)]
    sufficient: bool,
    command: Option<CommandField>,
}

impl From<ProposalPayload> for CommandProposal {
    fn from(payload: ProposalPayload) -> Self {
        let tokens = match payload.command {
            Some(CommandField::Tokens(tokens)) => tokens,
            Some(CommandField::Line(line)) => {
                line.split_whitespace().map(str::to_string).collect()
            }
            None => Vec::new(),
        };
        if payload.sufficient || tokens.is_empty() {
            Self::Sufficient
        } else {
            Self::Run(tokens)
        }
    }
}

/// Synthesizer backed by the Anthropic Messages API
pub struct AnthropicSynthesizer {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_tokens: u32,
    prompts: PromptTemplates,
}

impl AnthropicSynthesizer {
    /// The API key is passed in explicitly; `None` makes every call fail
    /// with [`SynthesisError::NotConfigured`].
    pub fn new(config: &SynthesisConfig, api_key: Option<String>) -> Result<Self, SynthesisError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            max_tokens: config.max_tokens,
            prompts: PromptTemplates::new()?,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, prompt: String) -> Result<String, SynthesisError> {
        let api_key = self.api_key.as_ref().ok_or(SynthesisError::NotConfigured)?;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: self.prompts.system()?,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.model, "Calling analysis service");
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, retry_after, &body));
        }

        let body: MessagesResponse = response.json().await.map_err(classify_transport)?;
        let text: String = body
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text)
            .collect();
        if text.trim().is_empty() {
            return Err(SynthesisError::InvalidResponse(
                "response contained no text".into(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl AnalysisSynthesizer for AnthropicSynthesizer {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn synthesize(
        &self,
        request: &SynthesisRequest<'_>,
    ) -> Result<SynthesizedAnalysis, SynthesisError> {
        let prompt = self.prompts.analysis(request.group, request.steps)?;
        let text = self.complete(prompt).await?;
        let analysis: SynthesizedAnalysis = parse_json_reply(&text)?;
        Ok(SynthesizedAnalysis {
            narrative: analysis.narrative.trim().to_string(),
            recommendations: analysis
                .recommendations
                .into_iter()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect(),
        })
    }

    async fn propose_next_command(
        &self,
        group: &ProblemGroup,
        steps: &[DiagnosticStep],
    ) -> Result<CommandProposal, SynthesisError> {
        let prompt = self.prompts.next_command(group, steps)?;
        let text = self.complete(prompt).await?;
        let payload: ProposalPayload = parse_json_reply(&text)?;
        Ok(payload.into())
    }
}

fn classify_transport(err: reqwest::Error) -> SynthesisError {
    if err.is_timeout() {
        SynthesisError::Timeout
    } else {
        SynthesisError::Http(err)
    }
}

/// Map a non-success HTTP status onto the synthesizer failure modes.
fn error_for_status(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> SynthesisError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|r| r.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status.as_u16() {
        // 529: overloaded
        429 | 529 => SynthesisError::RateLimited { retry_after_secs },
        401 | 403 => SynthesisError::Auth(message),
        408 | 504 => SynthesisError::Timeout,
        code => SynthesisError::Api {
            status: code,
            message,
        },
    }
}

/// Parse a JSON reply, tolerating markdown fences and surrounding prose.
fn parse_json_reply<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, SynthesisError> {
    let text = text.trim();
    let unfenced = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .and_then(|s| s.trim_end().strip_suffix("```"))
        .map_or(text, str::trim);

    if let Ok(value) = serde_json::from_str(unfenced) {
        return Ok(value);
    }

    // Fall back to the outermost object when the model added prose around it
    let object = match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    };
    serde_json::from_str(object).map_err(|e| {
        SynthesisError::InvalidResponse(format!("failed to parse reply as JSON: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            error_for_status(StatusCode::TOO_MANY_REQUESTS, Some(30), ""),
            SynthesisError::RateLimited {
                retry_after_secs: Some(30)
            }
        ));
        let auth = error_for_status(
            StatusCode::UNAUTHORIZED,
            None,
            r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
        );
        assert!(matches!(&auth, SynthesisError::Auth(m) if m == "invalid x-api-key"));
        assert!(auth.is_auth());
        assert!(matches!(
            error_for_status(StatusCode::GATEWAY_TIMEOUT, None, ""),
            SynthesisError::Timeout
        ));
        assert!(matches!(
            error_for_status(StatusCode::INTERNAL_SERVER_ERROR, None, "boom"),
            SynthesisError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_parse_fenced_reply() {
        let text = "```json\n{\"narrative\": \"OOM\", \"recommendations\": [\"raise limit\"]}\n```";
        let analysis: SynthesizedAnalysis = parse_json_reply(text).unwrap();
        assert_eq!(analysis.narrative, "OOM");
        assert_eq!(analysis.recommendations, vec!["raise limit"]);
    }

    #[test]
    fn test_parse_reply_with_prose() {
        let text = "Here is my analysis:\n{\"narrative\": \"image tag typo\"}\nHope this helps.";
        let analysis: SynthesizedAnalysis = parse_json_reply(text).unwrap();
        assert_eq!(analysis.narrative, "image tag typo");
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_invalid_response() {
        let result: Result<SynthesizedAnalysis, _> = parse_json_reply("I cannot help");
        assert!(matches!(result, Err(SynthesisError::InvalidResponse(_))));
    }

    #[test]
    fn test_proposal_payloads() {
        let run: ProposalPayload =
            parse_json_reply(r#"{"sufficient": false, "command": ["get", "pods", "-n", "shop"]}"#)
                .unwrap();
        assert_eq!(
            CommandProposal::from(run),
            CommandProposal::Run(vec!["get".into(), "pods".into(), "-n".into(), "shop".into()])
        );

        let line: ProposalPayload =
            parse_json_reply(r#"{"command": "kubectl top pod web-1 -n shop"}"#).unwrap();
        assert!(matches!(CommandProposal::from(line), CommandProposal::Run(t) if t[0] == "kubectl"));

        let done: ProposalPayload = parse_json_reply(r#"{"sufficient": true}"#).unwrap();
        assert_eq!(CommandProposal::from(done), CommandProposal::Sufficient);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let synth = AnthropicSynthesizer::new(&SynthesisConfig::default(), Some("  ".into())).unwrap();
        assert!(!synth.is_configured());
        let result = synth.complete("hello".into()).await;
        assert!(matches!(result, Err(SynthesisError::NotConfigured)));
    }
}
