//! Optional AI explanation source.
//!
//! The chain only ever sees the [`Explainer`] capability. Without credentials
//! it gets [`DisabledExplainer`], which reports itself unavailable, so there is
//! no configuration branching anywhere else.

use crate::error::ExplainerError;
use crate::failure::FailureReport;
use async_trait::async_trait;
use coach_common::config::{AiConfig, AppConfig};
use coach_common::types::{Explanation, ExplanationSource, TimeoutKind};
use handlebars::Handlebars;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROMPT_TEMPLATE_NAME: &str = "explain";

const SYSTEM_PROMPT: &str = "You are a patient Python tutor. You explain errors to beginners \
in plain language and always answer with a single JSON object.";

const USER_PROMPT_TEMPLATE: &str = r#"A learner's Python program failed.

Program:
```python
{{code}}
```

Error:
{{error}}
{{#if timeout_note}}
{{timeout_note}}
{{/if}}
Reply with a JSON object containing exactly these fields:
- "summary": one sentence describing the problem
- "why_it_happened": a short explanation of the cause
- "how_to_fix": a list of concrete steps
- "corrected_example": a short corrected snippet, or null
- "confidence": a number between 0 and 1"#;

#[async_trait]
pub trait Explainer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this explainer can ever answer. The chain skips it silently
    /// when it cannot.
    fn is_configured(&self) -> bool {
        true
    }

    async fn explain(&self, code: &str, failure: &FailureReport<'_>) -> Result<Explanation, ExplainerError>;
}

/// Stand-in used when AI credentials are absent
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledExplainer;

#[async_trait]
impl Explainer for DisabledExplainer {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn explain(&self, _code: &str, _failure: &FailureReport<'_>) -> Result<Explanation, ExplainerError> {
        Err(ExplainerError::NotConfigured)
    }
}

/// Build the explainer described by the startup configuration
pub fn explainer_from_config(config: &AppConfig) -> Arc<dyn Explainer> {
    let Some(ai) = config.ai.clone() else {
        info!("AI explainer disabled: Azure OpenAI credentials not configured");
        return Arc::new(DisabledExplainer);
    };

    let deployment = ai.deployment.clone();
    match AzureOpenAiExplainer::new(ai, config.ai_timeout) {
        Ok(explainer) => {
            info!(deployment = %deployment, timeout_ms = config.ai_timeout.as_millis() as u64, "AI explainer enabled");
            Arc::new(explainer)
        }
        Err(e) => {
            warn!(error = %e, "Failed to initialise AI explainer, using pattern rules only");
            Arc::new(DisabledExplainer)
        }
    }
}

/// Azure OpenAI chat-completions client
pub struct AzureOpenAiExplainer {
    client: Client,
    config: AiConfig,
    prompts: Handlebars<'static>,
}

impl AzureOpenAiExplainer {
    pub fn new(config: AiConfig, timeout: Duration) -> Result<Self, ExplainerError> {
        let client = Client::builder().timeout(timeout).build()?;

        let mut prompts = Handlebars::new();
        prompts.register_escape_fn(handlebars::no_escape);
        prompts
            .register_template_string(PROMPT_TEMPLATE_NAME, USER_PROMPT_TEMPLATE)
            .map_err(|e| ExplainerError::Prompt(e.to_string()))?;

        Ok(Self { client, config, prompts })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.config.endpoint, self.config.deployment
        )
    }

    fn render_prompt(&self, code: &str, failure: &FailureReport<'_>) -> Result<String, ExplainerError> {
        let timeout_note = match failure.timeout_kind {
            TimeoutKind::None => None,
            TimeoutKind::Busy => Some("The program was stopped because it was still computing when its time limit expired."),
            TimeoutKind::WaitingForInput => {
                Some("The program was stopped while waiting for more input than was provided.")
            }
        };

        self.prompts
            .render(
                PROMPT_TEMPLATE_NAME,
                &json!({
                    "code": code,
                    "error": failure.raw_error,
                    "timeout_note": timeout_note,
                }),
            )
            .map_err(|e| ExplainerError::Prompt(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl Explainer for AzureOpenAiExplainer {
    fn name(&self) -> &'static str {
        "azure-openai"
    }

    async fn explain(&self, code: &str, failure: &FailureReport<'_>) -> Result<Explanation, ExplainerError> {
        let prompt = self.render_prompt(code, failure)?;

        debug!(deployment = %self.config.deployment, "Requesting AI explanation");

        let response = self
            .client
            .post(self.completions_url())
            .query(&[("api-version", self.config.api_version.as_str())])
            .header("api-key", self.config.api_key.expose_secret())
            .json(&json!({
                "messages": [
                    { "role": "system", "content": SYSTEM_PROMPT },
                    { "role": "user", "content": prompt },
                ],
                "temperature": 0.2,
                "max_tokens": 800,
                "response_format": { "type": "json_object" },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExplainerError::Status(status.as_u16()));
        }

        let completion: ChatCompletion = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExplainerError::Parse("completion has no message content".to_string()))?;

        parse_ai_explanation(&content)
    }
}

#[derive(Debug, Deserialize)]
struct AiExplanation {
    summary: String,
    why_it_happened: String,
    how_to_fix: Vec<String>,
    corrected_example: Option<String>,
    confidence: f64,
}

/// Parse model output into an `Explanation`. Missing or empty required
/// fields are a parse failure, never a partial success.
pub fn parse_ai_explanation(content: &str) -> Result<Explanation, ExplainerError> {
    let parsed: AiExplanation =
        serde_json::from_str(strip_code_fence(content)).map_err(|e| ExplainerError::Parse(e.to_string()))?;

    let how_to_fix: Vec<String> = parsed
        .how_to_fix
        .into_iter()
        .map(|step| step.trim().to_string())
        .filter(|step| !step.is_empty())
        .collect();

    if parsed.summary.trim().is_empty() {
        return Err(ExplainerError::Parse("summary is empty".to_string()));
    }
    if parsed.why_it_happened.trim().is_empty() {
        return Err(ExplainerError::Parse("why_it_happened is empty".to_string()));
    }
    if how_to_fix.is_empty() {
        return Err(ExplainerError::Parse("how_to_fix is empty".to_string()));
    }
    if !parsed.confidence.is_finite() {
        return Err(ExplainerError::Parse("confidence is not a number".to_string()));
    }

    Ok(Explanation {
        summary: parsed.summary.trim().to_string(),
        why_it_happened: parsed.why_it_happened.trim().to_string(),
        how_to_fix,
        corrected_example: parsed.corrected_example.filter(|example| !example.trim().is_empty()),
        confidence: parsed.confidence.clamp(0.0, 1.0),
        source: ExplanationSource::Ai,
        category: None,
    })
}

/// Models sometimes wrap JSON in a markdown fence despite being asked not to
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);

    match inner.find('\n') {
        Some(pos) if !inner[..pos].trim_start().starts_with('{') => inner[pos + 1..].trim(),
        _ => inner.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_CONTENT: &str = r#"{
        "summary": "You used x before assigning it.",
        "why_it_happened": "x is referenced on line 1 but never defined.",
        "how_to_fix": ["Assign x first"],
        "corrected_example": "x = 1\nprint(x)",
        "confidence": 0.9
    }"#;

    fn ai_config(endpoint: &str) -> AiConfig {
        AiConfig {
            endpoint: endpoint.to_string(),
            api_key: SecretString::from("test-key".to_string()),
            deployment: "tutor".to_string(),
            api_version: "2024-02-15-preview".to_string(),
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": content } }
            ]
        })
    }

    fn report() -> FailureReport<'static> {
        FailureReport::runtime("NameError: name 'x' is not defined")
    }

    #[test]
    fn test_parse_valid_content() {
        let explanation = parse_ai_explanation(VALID_CONTENT).unwrap();
        assert_eq!(explanation.source, ExplanationSource::Ai);
        assert_eq!(explanation.how_to_fix, vec!["Assign x first".to_string()]);
        assert_eq!(explanation.corrected_example.as_deref(), Some("x = 1\nprint(x)"));
        assert_eq!(explanation.confidence, 0.9);
    }

    #[test]
    fn test_parse_fenced_content() {
        let fenced = format!("```json\n{}\n```", VALID_CONTENT);
        assert!(parse_ai_explanation(&fenced).is_ok());
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let partial = r#"{"summary": "Something broke", "confidence": 0.7}"#;
        assert!(matches!(parse_ai_explanation(partial), Err(ExplainerError::Parse(_))));
    }

    #[test]
    fn test_parse_rejects_empty_steps() {
        let empty = r#"{"summary": "s", "why_it_happened": "w", "how_to_fix": ["  "], "confidence": 0.7}"#;
        assert!(matches!(parse_ai_explanation(empty), Err(ExplainerError::Parse(_))));
    }

    #[test]
    fn test_parse_clamps_confidence() {
        let high = r#"{"summary": "s", "why_it_happened": "w", "how_to_fix": ["f"], "confidence": 7.5}"#;
        assert_eq!(parse_ai_explanation(high).unwrap().confidence, 1.0);
    }

    #[test]
    fn test_prompt_mentions_code_error_and_timeout() {
        let explainer = AzureOpenAiExplainer::new(ai_config("http://localhost"), Duration::from_secs(1)).unwrap();
        let failure = FailureReport::new("Execution timed out after 2 seconds", TimeoutKind::WaitingForInput);
        let prompt = explainer.render_prompt("x = input() < 3", &failure).unwrap();

        assert!(prompt.contains("x = input() < 3"));
        assert!(prompt.contains("Execution timed out after 2 seconds"));
        assert!(prompt.contains("waiting for more input"));
    }

    #[tokio::test]
    async fn test_disabled_explainer_is_unavailable() {
        let result = DisabledExplainer.explain("print(x)", &report()).await;
        assert!(matches!(result, Err(ExplainerError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_azure_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/tutor/chat/completions"))
            .and(query_param("api-version", "2024-02-15-preview"))
            .and(header("api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(VALID_CONTENT)))
            .expect(1)
            .mount(&server)
            .await;

        let explainer = AzureOpenAiExplainer::new(ai_config(&server.uri()), Duration::from_secs(2)).unwrap();
        let explanation = explainer.explain("print(x)", &report()).await.unwrap();

        assert_eq!(explanation.source, ExplanationSource::Ai);
        assert_eq!(explanation.summary, "You used x before assigning it.");
    }

    #[tokio::test]
    async fn test_azure_error_status_hides_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\": \"invalid subscription key\"}"))
            .mount(&server)
            .await;

        let explainer = AzureOpenAiExplainer::new(ai_config(&server.uri()), Duration::from_secs(2)).unwrap();
        let err = explainer.explain("print(x)", &report()).await.unwrap_err();

        assert!(matches!(err, ExplainerError::Status(401)));
        assert!(!err.to_string().contains("subscription"));
    }

    #[tokio::test]
    async fn test_azure_malformed_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("not json at all")))
            .mount(&server)
            .await;

        let explainer = AzureOpenAiExplainer::new(ai_config(&server.uri()), Duration::from_secs(2)).unwrap();
        let err = explainer.explain("print(x)", &report()).await.unwrap_err();
        assert!(matches!(err, ExplainerError::Parse(_)));
    }

    #[tokio::test]
    async fn test_azure_client_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion(VALID_CONTENT))
                    .set_delay(Duration::from_millis(800)),
            )
            .mount(&server)
            .await;

        let explainer = AzureOpenAiExplainer::new(ai_config(&server.uri()), Duration::from_millis(100)).unwrap();
        let err = explainer.explain("print(x)", &report()).await.unwrap_err();
        assert!(matches!(err, ExplainerError::Http(_)));
    }

    #[test]
    fn test_from_config_without_credentials_is_disabled() {
        let explainer = explainer_from_config(&AppConfig::default());
        assert_eq!(explainer.name(), "disabled");
    }
}
