use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs};
use async_openai::Client;
use async_trait::async_trait;
use log::{debug, warn};

use crate::refine::{GenerationError, GenerationParameters, TextGeneration};
use crate::utils::token::tiktoken::Tiktoken;

/// [TextGeneration] over the OpenAI chat completion API.
///
/// The API key comes from `OPENAI_API_KEY`. `OPENAI_BASE_URL`, when set, points the client at a compatible endpoint.
pub struct OpenAIGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    /// Absent for models without a known tokenizer, in which case prompt lengths are not checked
    tokenizer: Option<Tiktoken>,
}

impl OpenAIGenerator {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a generator configured from the environment.
    pub fn new(model: impl Into<String>) -> Self {
        let mut config = OpenAIConfig::new();
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            config = config.with_api_key(api_key);
        }
        if let Ok(api_base) = std::env::var("OPENAI_BASE_URL") {
            config = config.with_api_base(api_base);
        }
        Self::with_config(model, config)
    }

    pub fn with_config(model: impl Into<String>, config: OpenAIConfig) -> Self {
        let model = model.into();
        let tokenizer = match Tiktoken::new(model.as_str()) {
            Ok(tokenizer) => Some(tokenizer),
            Err(err) => {
                warn!("Prompt lengths will not be checked for model {}: {}", model, err);
                None
            }
        };
        Self {
            client: Client::with_config(config),
            model,
            timeout: Self::DEFAULT_TIMEOUT,
            tokenizer,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn check_prompt_length(&self, prompt: &str, params: &GenerationParameters) -> Result<(), GenerationError> {
        let Some(tokenizer) = &self.tokenizer else {
            return Ok(());
        };
        let prompt_tokens = tokenizer.count_chat_tokens(params.system_prompt.as_deref(), prompt);
        debug!("Prompt takes {} tokens of {}", prompt_tokens, tokenizer.max_tokens);
        if tokenizer.fits(prompt_tokens, params.max_output_tokens as usize) {
            Ok(())
        } else {
            Err(GenerationError::PromptTooLong(format!(
                "{} prompt tokens plus {} output tokens exceed the {} token context of {}",
                prompt_tokens, params.max_output_tokens, tokenizer.max_tokens, self.model)))
        }
    }

    fn build_messages(prompt: &str, params: &GenerationParameters) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);
        if let Some(system_prompt) = &params.system_prompt {
            messages.push(ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt.as_str())
                .build()?
                .into());
        }
        messages.push(ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()?
            .into());
        Ok(messages)
    }

    async fn request(&self, prompt: &str, params: &GenerationParameters) -> Result<String, OpenAIError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(Self::build_messages(prompt, params)?)
            .temperature(params.temperature)
            .max_tokens(params.max_output_tokens)
            .build()?;
        let response = self.client.chat().create(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| OpenAIError::InvalidArgument("the response has no message content".to_string()))
    }
}

#[async_trait]
impl TextGeneration for OpenAIGenerator {
    async fn complete(&self, prompt: &str, params: &GenerationParameters) -> Result<String, GenerationError> {
        self.check_prompt_length(prompt, params)?;
        match tokio::time::timeout(self.timeout, self.request(prompt, params)).await {
            Ok(reply) => reply.map_err(into_generation_error),
            Err(_) => Err(GenerationError::Timeout(format!("no reply from {} within {:?}", self.model, self.timeout))),
        }
    }
}

fn into_generation_error(err: OpenAIError) -> GenerationError {
    match err {
        OpenAIError::ApiError(api_err) => classify_api_error(&api_err.message, api_err.r#type.as_deref()),
        OpenAIError::Reqwest(err) if err.is_timeout() => GenerationError::Timeout(err.to_string()),
        OpenAIError::JSONDeserialize(err) => GenerationError::MalformedResponse(err.to_string()),
        OpenAIError::InvalidArgument(msg) => GenerationError::MalformedResponse(msg),
        other => GenerationError::Other(other.to_string()),
    }
}

/// Sorts an API error reply by its type and message.
fn classify_api_error(message: &str, error_type: Option<&str>) -> GenerationError {
    let error_type = error_type.unwrap_or_default().to_lowercase();
    let lowered = message.to_lowercase();
    let mentions = |needle: &str| error_type.contains(needle) || lowered.contains(needle);
    if mentions("rate limit") || mentions("rate_limit") || mentions("quota") {
        GenerationError::RateLimited(message.to_string())
    } else if mentions("api key") || mentions("authentication") || mentions("invalid_api_key") || mentions("unauthorized") {
        GenerationError::Authentication(message.to_string())
    } else if mentions("context length") || mentions("context_length") || mentions("maximum context") {
        GenerationError::PromptTooLong(message.to_string())
    } else {
        GenerationError::Other(message.to_string())
    }
}
