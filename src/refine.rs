use crate::catalog::Catalog;
use crate::model::AnswerRecord;
use crate::openai::OpenAIClientTrait;
use crate::prompts::{REFINE_SYSTEM_PROMPT, REFINE_USER_PROMPT};
use anyhow::Result;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const DEFAULT_REFINE_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_REFINE_TIMEOUT: Duration = Duration::from_secs(20);

/// Polishes a finished record into a natural diary sentence.
///
/// Implementations may fail or return nothing useful; callers go through
/// `refine_or_compose`, which falls back to the local draft.
#[async_trait]
pub trait RefinementGateway: Send + Sync {
    async fn refine(&self, request: &RefinementRequest) -> Result<String>;
}

/// The keywords a refinement prompt is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefinementRequest {
    pub when: String,
    pub subject: String,
    pub activity: String,
    pub people: String,
    pub feeling: String,
}

impl RefinementRequest {
    /// The activity is the chosen detail only for subjects that ask the
    /// standard detail question (recess); lessons send the subject.
    pub fn from_record(record: &AnswerRecord, catalog: &Catalog) -> Self {
        let subject = record.subject.clone().unwrap_or_default();
        let activity = match &record.detail {
            Some(detail) if catalog.asks_detail(&subject) => detail.clone(),
            _ => subject.clone(),
        };
        let people = if record.has_companions() {
            record.companions.join("と、")
        } else {
            record
                .companion_kind
                .map(|k| k.label().to_string())
                .unwrap_or_default()
        };
        Self {
            when: record.when_label().unwrap_or_default().to_string(),
            subject,
            activity,
            people,
            feeling: record.feeling.clone().unwrap_or_default(),
        }
    }

    pub fn user_prompt(&self) -> String {
        REFINE_USER_PROMPT
            .replace("{when}", &self.when)
            .replace("{subject}", &self.subject)
            .replace("{activity}", &self.activity)
            .replace("{people}", &self.people)
            .replace("{feeling}", &self.feeling)
    }
}

/// Refinement through any OpenAI-compatible chat completion endpoint.
pub struct ChatRefinementGateway {
    client: Arc<dyn OpenAIClientTrait>,
    model: String,
}

impl ChatRefinementGateway {
    pub fn new(client: Arc<dyn OpenAIClientTrait>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl RefinementGateway for ChatRefinementGateway {
    #[instrument(skip_all, err)]
    async fn refine(&self, request: &RefinementRequest) -> Result<String> {
        let system_message = ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(REFINE_SYSTEM_PROMPT.trim())
                .build()
                .map_err(|e| {
                    anyhow::anyhow!("Failed to build system message: {}", e)
                })?,
        );
        let user_message = ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user_prompt())
                .build()
                .map_err(|e| {
                    anyhow::anyhow!("Failed to build user message: {}", e)
                })?,
        );

        let response = self
            .client
            .chat_completion(
                self.model.clone(),
                vec![system_message, user_message],
            )
            .await
            .map_err(|e| {
                anyhow::anyhow!("Failed to create chat completion: {}", e)
            })?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(anyhow::anyhow!("Refinement returned no text"));
        }
        debug!("Refined sentence: {}", text);
        Ok(text.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SentenceSource {
    Refined,
    Local,
}

/// The sentence shown in the result state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sentence {
    pub text: String,
    pub source: SentenceSource,
}

impl Sentence {
    pub fn local(text: String) -> Self {
        Self {
            text,
            source: SentenceSource::Local,
        }
    }
}

/// Single refinement attempt bounded by `timeout`; any failure yields
/// `draft` unchanged.
pub async fn refine_or_compose(
    gateway: Option<&dyn RefinementGateway>,
    request: &RefinementRequest,
    draft: String,
    timeout: Duration,
) -> Sentence {
    let Some(gateway) = gateway else {
        return Sentence::local(draft);
    };
    match tokio::time::timeout(timeout, gateway.refine(request)).await {
        Ok(Ok(text)) => Sentence {
            text,
            source: SentenceSource::Refined,
        },
        Ok(Err(e)) => {
            warn!("Refinement unavailable, using local sentence: {}", e);
            Sentence::local(draft)
        }
        Err(_) => {
            warn!(
                "Refinement timed out after {:?}, using local sentence",
                timeout
            );
            Sentence::local(draft)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompanionKind, When};
    use crate::openai::fake::FakeOpenAIClient;
    use crate::test_utils::{builtin_catalog, math_record};
    use async_openai::types::ChatCompletionRequestUserMessageContent;

    fn recess_record() -> AnswerRecord {
        AnswerRecord {
            when: Some(When::Today),
            subject: Some("やすみじかん".to_string()),
            detail: Some("おにごっこした".to_string()),
            companions: vec!["あいりちゃん".to_string(), "そらくん".to_string()],
            companion_kind: None,
            feeling: Some("たのしかった".to_string()),
        }
    }

    fn recess_request() -> RefinementRequest {
        RefinementRequest::from_record(&recess_record(), &builtin_catalog())
    }

    struct HangingGateway;

    #[async_trait]
    impl RefinementGateway for HangingGateway {
        async fn refine(&self, _request: &RefinementRequest) -> Result<String> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_request_from_record() {
        let request = recess_request();
        assert_eq!(request.activity, "おにごっこした");
        assert_eq!(request.people, "あいりちゃんと、そらくん");
        assert_eq!(
            request.user_prompt(),
            "キーワード：いつ=きょう、なにの時間=やすみじかん、\
             具体的になにをした=おにごっこした、だれと=あいりちゃんと、そらくん、\
             きもち=たのしかった"
        );
    }

    #[test]
    fn test_request_without_detail_uses_subject() {
        let record = AnswerRecord {
            when: Some(When::Yesterday),
            subject: Some("りか".to_string()),
            companion_kind: Some(CompanionKind::Teacher),
            feeling: Some("がんばった".to_string()),
            ..Default::default()
        };
        let request =
            RefinementRequest::from_record(&record, &builtin_catalog());
        assert_eq!(request.activity, "りか");
        assert_eq!(request.people, "せんせいと");
        assert_eq!(request.when, "きのう");
    }

    #[test]
    fn test_lesson_request_sends_subject_as_activity() {
        let request =
            RefinementRequest::from_record(&math_record(), &builtin_catalog());
        assert_eq!(request.activity, "さんすう");
        assert!(request.user_prompt().contains("具体的になにをした=さんすう"));
        assert!(!request.user_prompt().contains("たしざん"));
    }

    #[tokio::test]
    async fn test_chat_gateway_sends_prompts_and_trims() {
        let client = Arc::new(
            FakeOpenAIClient::new()
                .with_response("  きょう、やすみじかんに おにごっこを しました。\n"),
        );
        let gateway =
            ChatRefinementGateway::new(client.clone(), "test-model".to_string());

        let text = gateway.refine(&recess_request()).await.unwrap();
        assert_eq!(text, "きょう、やすみじかんに おにごっこを しました。");

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model_name, "test-model");
        assert_eq!(requests[0].messages.len(), 2);
        match &requests[0].messages[1] {
            ChatCompletionRequestMessage::User(user) => match &user.content {
                ChatCompletionRequestUserMessageContent::Text(text) => {
                    assert!(text.contains("だれと=あいりちゃんと、そらくん"));
                }
                other => panic!("unexpected content: {:?}", other),
            },
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_or_missing_content_is_an_error() {
        let client = Arc::new(
            FakeOpenAIClient::new()
                .with_response("   ")
                .with_none_content_response(),
        );
        let gateway = ChatRefinementGateway::new(client, "m".to_string());
        assert!(gateway.refine(&recess_request()).await.is_err());
        assert!(gateway.refine(&recess_request()).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_draft() {
        crate::test_utils::init_test_logging();
        let client = Arc::new(FakeOpenAIClient::new().with_error("timeout"));
        let gateway = ChatRefinementGateway::new(client, "m".to_string());

        let sentence = refine_or_compose(
            Some(&gateway),
            &recess_request(),
            "local draft".to_string(),
            DEFAULT_REFINE_TIMEOUT,
        )
        .await;
        assert_eq!(sentence, Sentence::local("local draft".to_string()));
    }

    #[tokio::test]
    async fn test_hanging_gateway_times_out_to_draft() {
        crate::test_utils::init_test_logging();
        let sentence = refine_or_compose(
            Some(&HangingGateway),
            &recess_request(),
            "local draft".to_string(),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(sentence, Sentence::local("local draft".to_string()));
    }

    #[tokio::test]
    async fn test_no_gateway_is_local() {
        let sentence =
            refine_or_compose(
                None,
                &recess_request(),
                "draft".to_string(),
                DEFAULT_REFINE_TIMEOUT,
            )
            .await;
        assert_eq!(sentence.source, SentenceSource::Local);
        assert_eq!(sentence.text, "draft");
    }
}
