use tracing::debug;

use crate::anthropic::{AnthropicClient, MessageSender, MessagesRequest};
use crate::error::AgentError;
use crate::review::heuristics::HeuristicAgent;
use crate::review::types::{AnalysisKind, ItemVerdict, Recommendation, RiskLevel, WorkItem};

/// One attempt at one sub-analysis. Implementations must not retry
/// internally; the caller owns the retry and timeout policy.
#[allow(async_fn_in_trait)]
pub trait ReviewAgent {
    async fn analyze(&self, kind: AnalysisKind, item: &WorkItem) -> Result<ItemVerdict, AgentError>;

    /// Model or engine name reported in review metadata.
    fn model_name(&self) -> &str;
}

/// Raw JSON the model is asked to produce.
#[derive(Debug, serde::Deserialize)]
struct LlmVerdict {
    recommendation: Recommendation,
    risk_level: RiskLevel,
    #[serde(default)]
    findings: Vec<String>,
}

/// Sub-analyses answered by a Messages API model.
pub struct LlmAgent<S> {
    sender: S,
    model: String,
}

impl<S: MessageSender> LlmAgent<S> {
    pub fn new(sender: S, model: impl Into<String>) -> Self {
        Self {
            sender,
            model: model.into(),
        }
    }
}

fn system_prompt(kind: AnalysisKind) -> &'static str {
    match kind {
        AnalysisKind::CodeQuality => {
            "You are a senior reviewer assessing code quality: readability, structure, \
             error handling, naming and maintainability of a pull request."
        }
        AnalysisKind::TestQuality => {
            "You are a reviewer assessing test quality: whether the change is covered by \
             tests, whether the reported test run is healthy, and what is left untested."
        }
        AnalysisKind::Security => {
            "You are a security reviewer looking for injection, hard-coded secrets, unsafe \
             deserialization, weak cryptography and authentication flaws in a pull request."
        }
    }
}

fn user_prompt(item: &WorkItem) -> String {
    let tests = match &item.test_summary {
        Some(t) => format!(
            "passed={} total={} failed={} coverage={:.1}%",
            t.passed, t.total_tests, t.failed_tests, t.coverage_percent
        ),
        None => "no test results provided".to_string(),
    };
    format!(
        "Review this pull request. Respond with ONLY valid JSON, no other text.\n\
         Format: {{\"recommendation\": \"APPROVE|REQUEST_CHANGES|BLOCK\", \
         \"risk_level\": \"LOW|MEDIUM|HIGH\", \"findings\": [\"<short finding>\"]}}\n\
         \n\
         Title: {}\n\
         Description: {}\n\
         Test results: {tests}\n\
         Diff:\n{}",
        item.title, item.description, item.diff
    )
}

/// Parse model output, tolerating a fenced ```json block around the object.
fn parse_verdict(kind: AnalysisKind, text: &str) -> Result<ItemVerdict, AgentError> {
    let body = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let raw: LlmVerdict = serde_json::from_str(body)
        .map_err(|e| AgentError::InvalidResponse(format!("{kind}: {e}")))?;
    Ok(ItemVerdict {
        kind,
        recommendation: raw.recommendation,
        risk_level: raw.risk_level,
        findings: raw.findings,
    })
}

impl<S: MessageSender> ReviewAgent for LlmAgent<S> {
    async fn analyze(
        &self,
        kind: AnalysisKind,
        item: &WorkItem,
    ) -> Result<ItemVerdict, AgentError> {
        let req =
            MessagesRequest::single_turn(&self.model, 1024, system_prompt(kind), user_prompt(item));
        let response = self.sender.send_message(&req).await?;
        debug!(
            %kind,
            title = %item.title,
            output_tokens = response.usage.output_tokens,
            "model answered"
        );
        parse_verdict(kind, &response.text())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// The agent chosen at startup: a live model when an API key is configured,
/// offline heuristics otherwise.
pub enum AnyAgent {
    Llm(LlmAgent<AnthropicClient>),
    Heuristic(HeuristicAgent),
}

impl ReviewAgent for AnyAgent {
    async fn analyze(
        &self,
        kind: AnalysisKind,
        item: &WorkItem,
    ) -> Result<ItemVerdict, AgentError> {
        match self {
            AnyAgent::Llm(agent) => agent.analyze(kind, item).await,
            AnyAgent::Heuristic(agent) => agent.analyze(kind, item).await,
        }
    }

    fn model_name(&self) -> &str {
        match self {
            AnyAgent::Llm(agent) => agent.model_name(),
            AnyAgent::Heuristic(agent) => agent.model_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anthropic::{AnthropicError, ContentBlock, MessagesResponse, Usage};
    use std::cell::RefCell;

    struct MockSender {
        reply: Result<String, u16>,
        last_request: RefCell<Option<MessagesRequest>>,
    }

    impl MockSender {
        fn ok(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                last_request: RefCell::new(None),
            }
        }

        fn status(status: u16) -> Self {
            Self {
                reply: Err(status),
                last_request: RefCell::new(None),
            }
        }
    }

    impl MessageSender for MockSender {
        async fn send_message(
            &self,
            req: &MessagesRequest,
        ) -> Result<MessagesResponse, AnthropicError> {
            *self.last_request.borrow_mut() = Some(req.clone());
            match &self.reply {
                Ok(text) => Ok(MessagesResponse {
                    id: "mock".into(),
                    content: vec![ContentBlock {
                        content_type: "text".into(),
                        text: text.clone(),
                    }],
                    model: "mock".into(),
                    stop_reason: Some("end_turn".into()),
                    usage: Usage {
                        input_tokens: 0,
                        output_tokens: 0,
                    },
                }),
                Err(status) => Err(AnthropicError::ApiError {
                    status: *status,
                    message: "mock error".into(),
                }),
            }
        }
    }

    fn item() -> WorkItem {
        WorkItem::new("PR-7: Add login", "Adds a login form", "+fn login() {}")
    }

    #[tokio::test]
    async fn parses_model_verdict() {
        let agent = LlmAgent::new(
            MockSender::ok(
                r#"{"recommendation":"BLOCK","risk_level":"HIGH","findings":["sql injection"]}"#,
            ),
            "test-model",
        );
        let verdict = agent.analyze(AnalysisKind::Security, &item()).await.unwrap();
        assert_eq!(verdict.kind, AnalysisKind::Security);
        assert_eq!(verdict.recommendation, Recommendation::Block);
        assert_eq!(verdict.risk_level, RiskLevel::High);
        assert_eq!(verdict.findings, vec!["sql injection"]);
    }

    #[tokio::test]
    async fn prompt_carries_item_and_kind() {
        let sender = MockSender::ok(r#"{"recommendation":"APPROVE","risk_level":"LOW"}"#);
        let agent = LlmAgent::new(sender, "test-model");
        agent.analyze(AnalysisKind::TestQuality, &item()).await.unwrap();

        let req = agent.sender.last_request.borrow().clone().unwrap();
        assert_eq!(req.model, "test-model");
        assert!(req.system.unwrap().contains("test quality"));
        assert!(req.messages[0].content.contains("PR-7: Add login"));
        assert!(req.messages[0].content.contains("no test results provided"));
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let agent = LlmAgent::new(
            MockSender::ok(
                "```json\n{\"recommendation\":\"REQUEST_CHANGES\",\"risk_level\":\"MEDIUM\"}\n```",
            ),
            "m",
        );
        let verdict = agent.analyze(AnalysisKind::CodeQuality, &item()).await.unwrap();
        assert_eq!(verdict.recommendation, Recommendation::RequestChanges);
        assert!(verdict.findings.is_empty());
    }

    #[tokio::test]
    async fn prose_answer_is_a_retryable_invalid_response() {
        let agent = LlmAgent::new(MockSender::ok("Looks fine to me!"), "m");
        let err = agent.analyze(AnalysisKind::CodeQuality, &item()).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidResponse(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn api_errors_keep_their_status() {
        let agent = LlmAgent::new(MockSender::status(401), "m");
        let err = agent.analyze(AnalysisKind::Security, &item()).await.unwrap_err();
        assert_eq!(
            err,
            AgentError::Api {
                status: 401,
                message: "mock error".into()
            }
        );
        assert!(!err.is_retryable());
    }
}
