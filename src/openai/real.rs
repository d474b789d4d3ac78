use crate::openai::OpenAIClientTrait;
use anyhow::Result;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse,
};
use async_openai::Client;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

// A real implementation of the OpenAI client
pub struct RealOpenAIClient {
    client: Client<OpenAIConfig>,
}

impl RealOpenAIClient {
    pub fn new(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OpenAIClientTrait for RealOpenAIClient {
    async fn chat_completion(
        &self,
        model: String,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<CreateChatCompletionResponse, anyhow::Error> {
        // Create the OpenAI request
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .build()?;

        let response = self.client.chat().create(request).await?;
        Ok(response)
    }
}

/// Builds a client when an API key is configured.
///
/// A missing key is an error so callers can log it and run without
/// refinement; no network call is ever attempted in that case.
pub fn maybe_create_openai_client(
    api_key: Option<String>,
    api_base: Option<String>,
) -> Result<Arc<dyn OpenAIClientTrait>> {
    let api_key = api_key
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("OpenAI API key not configured"))?;

    let mut config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(api_base) = api_base {
        info!("Using OpenAI API base {}", api_base);
        config = config.with_api_base(api_base);
    }
    Ok(Arc::new(RealOpenAIClient::new(Client::with_config(config))))
}
