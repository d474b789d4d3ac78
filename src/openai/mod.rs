pub mod fake;
pub mod real;

use anyhow::Result;
use async_openai::types::{
    ChatCompletionRequestMessage, CreateChatCompletionResponse,
};
use async_trait::async_trait;

/// What a request sent to the model looked like, kept by fakes so tests
/// can assert on it.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model_name: String,
    pub messages: Vec<ChatCompletionRequestMessage>,
}

/// A trait that abstracts the chat completion client for testing
///
/// Both the real client and `fake::FakeOpenAIClient` implement it. Any
/// OpenAI-compatible endpoint works, including Gemini's compatibility
/// endpoint, since the API base is configurable.
#[async_trait]
pub trait OpenAIClientTrait: Send + Sync {
    /// Creates a chat completion by sending messages to the language model
    ///
    /// # Arguments
    /// * `model` - The model identifier (e.g., "gemini-2.5-flash")
    /// * `messages` - A sequence of messages using OpenAI types
    ///
    /// # Returns
    /// The complete ChatCompletionResponse from the model, or an error
    async fn chat_completion(
        &self,
        model: String,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<CreateChatCompletionResponse, anyhow::Error>;
}
