use anyhow::Result;
use async_openai::types::{
    ChatChoice, ChatCompletionRequestMessage, ChatCompletionResponseMessage,
    CompletionUsage, CreateChatCompletionResponse, FinishReason, Role,
};
use async_trait::async_trait;
use std::sync::Mutex;

use crate::openai::{ModelRequest, OpenAIClientTrait};

enum FakeResponse {
    Content(Option<String>),
    Error(String),
}

/// A fake implementation of the OpenAI client for testing
///
/// Responses are queued with the builder methods and handed out in order;
/// once the queue is empty every call returns "Fake default response".
/// Requests are recorded for verification.
///
/// # Example
///
/// ```
/// use school_diary::openai::OpenAIClientTrait;
/// use school_diary::openai::fake::FakeOpenAIClient;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = FakeOpenAIClient::new()
///         .with_response("きょうは たのしかったです。")
///         .with_error("quota exceeded");
///
///     let response = client.chat_completion("gemini".to_string(), vec![]).await?;
///     let content = response.choices.first()
///         .and_then(|choice| choice.message.content.as_ref())
///         .map(String::from)
///         .unwrap_or_default();
///     assert_eq!(content, "きょうは たのしかったです。");
///
///     assert!(client.chat_completion("gemini".to_string(), vec![]).await.is_err());
///     Ok(())
/// }
/// ```
pub struct FakeOpenAIClient {
    responses: Mutex<Vec<FakeResponse>>,
    // Track requests for verification in tests
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl Default for FakeOpenAIClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeOpenAIClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(vec![]),
            requests: Mutex::new(vec![]),
        }
    }

    /// Add a response to be returned by the fake client
    pub fn with_response(self, response: &str) -> Self {
        self.push(FakeResponse::Content(Some(response.to_string())));
        self
    }

    /// Configure the client to return a response with None content
    pub fn with_none_content_response(self) -> Self {
        self.push(FakeResponse::Content(None));
        self
    }

    /// Configure the client to fail the next call
    pub fn with_error(self, message: &str) -> Self {
        self.push(FakeResponse::Error(message.to_string()));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn push(&self, response: FakeResponse) {
        self.responses.lock().unwrap().push(response);
    }
}

#[async_trait]
impl OpenAIClientTrait for FakeOpenAIClient {
    async fn chat_completion(
        &self,
        model: String,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<CreateChatCompletionResponse, anyhow::Error> {
        // Store the request for later verification
        self.requests.lock().unwrap().push(ModelRequest {
            model_name: model.clone(),
            messages,
        });

        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                FakeResponse::Content(Some(
                    "Fake default response".to_string(),
                ))
            } else {
                responses.remove(0)
            }
        };

        let content_option = match next {
            FakeResponse::Content(content) => content,
            FakeResponse::Error(message) => {
                return Err(anyhow::anyhow!(message));
            }
        };

        // Create the response message
        let message = ChatCompletionResponseMessage {
            role: Role::Assistant,
            content: content_option,
            #[allow(deprecated)]
            function_call: None,
            tool_calls: None,
            #[allow(deprecated)]
            refusal: None,
            audio: None,
        };

        let chat_choice = ChatChoice {
            index: 0,
            message,
            finish_reason: Some(FinishReason::Stop),
            logprobs: None,
        };

        let usage = CompletionUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            prompt_tokens_details: None,
            completion_tokens_details: None,
        };

        Ok(CreateChatCompletionResponse {
            id: "fake_id".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: model.clone(),
            system_fingerprint: Some("fake-fingerprint".to_string()),
            service_tier: None,
            choices: vec![chat_choice],
            usage: Some(usage),
        })
    }
}
