use anyhow::{anyhow, Result};
pub use tiktoken_rs::{get_bpe_from_model, CoreBPE};

use crate::utils::token::CountToken;

const TOKENS_PER_MESSAGE: usize = 3;
const TOKENS_REPLY_PRIMING: usize = 3;

/// Context window sizes by model-name prefix. Longer prefixes come first so that `gpt-4-32k` wins over `gpt-4`.
const MODEL_PREFIX_TO_MAX_TOKENS: [(&str, usize); 9] = [
    ("gpt-4o", 128000),
    ("gpt-4-turbo", 128000),
    ("gpt-4-1106", 128000),
    ("gpt-4-0125", 128000),
    ("gpt-4-32k", 32768),
    ("gpt-4", 8192),
    ("gpt-3.5-turbo-16k", 16384),
    ("gpt-3.5-turbo-1106", 16385),
    ("gpt-3.5-turbo", 4096),
];

/// The context window of a model, if the model is known.
pub fn context_window(model: &str) -> Option<usize> {
    MODEL_PREFIX_TO_MAX_TOKENS
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, max_tokens)| *max_tokens)
}

/// Counter using the Tiktoken tokenizer.
#[derive(Clone)]
#[readonly::make]
pub struct Tiktoken {
    /// The model name of the tokenizer. read-only.
    #[readonly]
    pub model: String,
    /// The context window of the model. read-only.
    #[readonly]
    pub max_tokens: usize,
    /// The tokenizer. read-only.
    #[readonly]
    pub bpe: CoreBPE,
}

impl Tiktoken {
    /// Create a new Tiktoken counter. Fails if the model has no known tokenizer or context window.
    pub fn new(model: impl Into<String>) -> Result<Self> {
        let model = model.into();
        let max_tokens = context_window(&model)
            .ok_or_else(|| anyhow!("model {} has no known context window", model))?;
        let bpe = get_bpe_from_model(&model)?;
        Ok(Tiktoken {
            model,
            max_tokens,
            bpe,
        })
    }

    /// Count the tokens of a system + user chat request, including the per-message overhead and the reply priming.
    pub fn count_chat_tokens(&self, system_prompt: Option<&str>, user_prompt: &str) -> usize {
        let system_tokens = system_prompt.map_or(0, |s| self.count_token(s) + TOKENS_PER_MESSAGE);
        system_tokens + self.count_token(user_prompt) + TOKENS_PER_MESSAGE + TOKENS_REPLY_PRIMING
    }

    /// Whether a request with the given prompt tokens leaves room for `max_output_tokens` in the context window.
    #[inline]
    pub fn fits(&self, prompt_tokens: usize, max_output_tokens: usize) -> bool {
        prompt_tokens + max_output_tokens <= self.max_tokens
    }
}

impl CountToken for Tiktoken {
    fn count_token(&self, string: &str) -> usize {
        self.bpe.encode_with_special_tokens(string).len()
    }
}
