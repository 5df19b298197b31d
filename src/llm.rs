use crate::config::{EndpointConfig, JUDGE_TEMPERATURE};
use crate::error::ConfigError;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Text and token usage of one chat completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Rate-limited client for an OpenAI-compatible chat completion endpoint
pub struct ChatClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    rate_limit_rps: f64,
    /// Time of the last request, guarded so concurrent callers queue up
    last_request: Mutex<Option<Instant>>,
}

impl ChatClient {
    /// Build a client, resolving the API key from the configured variable
    pub fn from_config(config: &EndpointConfig) -> std::result::Result<Self, ConfigError> {
        let api_key = config.resolve_api_key()?;
        Ok(Self::with_api_key(config, api_key))
    }

    /// Build a client with an explicit API key
    pub fn with_api_key(config: &EndpointConfig, api_key: String) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.api_endpoint);

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature.unwrap_or(JUDGE_TEMPERATURE) as f32,
            max_tokens: config.max_tokens,
            rate_limit_rps: config.rate_limit_rps,
            last_request: Mutex::new(None),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Enforce rate limiting for API requests
    async fn enforce_rate_limit(last_request: &mut Option<Instant>, rate_limit_rps: f64) {
        if rate_limit_rps.is_nan() || rate_limit_rps <= 0.0 {
            return;
        }
        let Ok(min_interval) = Duration::try_from_secs_f64(1.0 / rate_limit_rps) else {
            return;
        };

        if let Some(last_time) = *last_request {
            let elapsed = last_time.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }

        *last_request = Some(Instant::now());
    }

    /// Send one prompt, optionally preceded by a system message
    pub async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<Completion> {
        {
            let mut last_request = self.last_request.lock().await;
            Self::enforce_rate_limit(&mut *last_request, self.rate_limit_rps).await;
        }

        let request = self.build_request(system, prompt)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .context("Chat completion request failed")?;

        Ok(Self::extract_completion(response))
    }

    /// Build the chat completion request
    fn build_request(&self, system: Option<&str>, prompt: &str) -> Result<CreateChatCompletionRequest> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);

        if let Some(system) = system {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.to_string())
                    .build()
                    .context("Failed to build system message")?
                    .into(),
            );
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt.to_string())
                .build()
                .context("Failed to build user message")?
                .into(),
        );

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens.min(u16::MAX as u32) as u16)
            .build()
            .context("Failed to build chat completion request")
    }

    /// Extract text and usage from the API response
    fn extract_completion(response: CreateChatCompletionResponse) -> Completion {
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        let (prompt_tokens, completion_tokens) = match response.usage {
            Some(usage) => (usage.prompt_tokens as u64, usage.completion_tokens as u64),
            None => (0, 0),
        };

        Completion {
            content,
            prompt_tokens,
            completion_tokens,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::time::Instant as TokioInstant;

    pub(crate) fn endpoint(api_endpoint: &str) -> EndpointConfig {
        EndpointConfig {
            api_endpoint: api_endpoint.to_string(),
            env_var_api_key: "SKILL_EVAL_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            model: "test-model".to_string(),
            temperature: Some(0.1),
            max_tokens: 512,
            rate_limit_rps: 0.0,
        }
    }

    pub(crate) fn completion_body(content: &str) -> String {
        serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1_700_000_000u32,
            "model": "test-model",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150 }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_enforce_rate_limit_no_limit() {
        let mut last_request = None;
        let start = TokioInstant::now();

        ChatClient::enforce_rate_limit(&mut last_request, 0.0).await;

        assert!(start.elapsed() < Duration::from_millis(10));
        assert!(last_request.is_none());
    }

    #[tokio::test]
    async fn test_enforce_rate_limit_first_request() {
        let mut last_request = None;
        let start = TokioInstant::now();

        ChatClient::enforce_rate_limit(&mut last_request, 10.0).await;

        assert!(start.elapsed() < Duration::from_millis(10));
        assert!(last_request.is_some());
    }

    #[tokio::test]
    async fn test_enforce_rate_limit_with_sleep() {
        let mut last_request = Some(Instant::now());
        let start = TokioInstant::now();

        ChatClient::enforce_rate_limit(&mut last_request, 100.0).await;

        assert!(start.elapsed() >= Duration::from_millis(8));
    }

    #[tokio::test]
    async fn test_enforce_rate_limit_ignores_unusable_rates() {
        for rps in [f64::NAN, 1e-300] {
            let mut last_request = Some(Instant::now());
            let start = TokioInstant::now();

            ChatClient::enforce_rate_limit(&mut last_request, rps).await;

            assert!(start.elapsed() < Duration::from_millis(10));
        }
    }

    #[test]
    fn test_from_config_missing_key() {
        let result = ChatClient::from_config(&endpoint("http://localhost:1"));
        assert!(matches!(result, Err(ConfigError::MissingCredential(_))));
    }

    #[tokio::test]
    async fn test_complete_returns_content_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("hello there"))
            .create_async()
            .await;

        let client = ChatClient::with_api_key(&endpoint(&server.url()), "test-key".to_string());
        let completion = client.complete(Some("be brief"), "hi").await.unwrap();

        mock.assert_async().await;
        assert_eq!(completion.content, "hello there");
        assert_eq!(completion.prompt_tokens, 120);
        assert_eq!(completion.completion_tokens, 30);
    }

    #[tokio::test]
    async fn test_complete_malformed_response_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("not json at all")
            .create_async()
            .await;

        let client = ChatClient::with_api_key(&endpoint(&server.url()), "test-key".to_string());
        assert!(client.complete(None, "hi").await.is_err());
    }
}
