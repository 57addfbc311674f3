use std::error::Error;
use std::fmt;
use std::fmt::Formatter;

use serde::{Deserialize, Serialize};

/// Failure of a [TextGeneration](crate::refine::TextGeneration) or [QualityScorer](crate::refine::QualityScorer) call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum GenerationError {
    RateLimited(String),
    Timeout(String),
    MalformedResponse(String),
    Authentication(String),
    /// The prompt does not fit in the model's context window
    PromptTooLong(String),
    Other(String),
}

impl GenerationError {
    pub fn message(&self) -> &str {
        match self {
            GenerationError::RateLimited(msg)
            | GenerationError::Timeout(msg)
            | GenerationError::MalformedResponse(msg)
            | GenerationError::Authentication(msg)
            | GenerationError::PromptTooLong(msg)
            | GenerationError::Other(msg) => msg,
        }
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::RateLimited(_) | GenerationError::Timeout(_))
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let kind = match self {
            GenerationError::RateLimited(_) => "RateLimited",
            GenerationError::Timeout(_) => "Timeout",
            GenerationError::MalformedResponse(_) => "MalformedResponse",
            GenerationError::Authentication(_) => "Authentication",
            GenerationError::PromptTooLong(_) => "PromptTooLong",
            GenerationError::Other(_) => "GenerationError",
        };
        write!(f, "{}: {}", kind, self.message())
    }
}

impl Error for GenerationError {}

/// Rejected [RunConfiguration](crate::refine::RunConfiguration), reported before any generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidConfiguration {
    ZeroMaxIterations,
    ThresholdOutOfRange { threshold: f64, min: f64, max: f64 },
    InvalidImprovementDelta(f64),
    ZeroDiminishingWindow,
    /// A stage template uses a placeholder the loop cannot fill
    UnknownPlaceholder { stage: String, placeholder: String },
}

impl fmt::Display for InvalidConfiguration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InvalidConfiguration::ZeroMaxIterations =>
                write!(f, "InvalidConfiguration: max_iterations must be at least 1"),
            InvalidConfiguration::ThresholdOutOfRange { threshold, min, max } =>
                write!(f, "InvalidConfiguration: quality_threshold = {} is outside the scorer range [{}, {}]", threshold, min, max),
            InvalidConfiguration::InvalidImprovementDelta(delta) =>
                write!(f, "InvalidConfiguration: min_improvement_delta = {} must be a finite non-negative number", delta),
            InvalidConfiguration::ZeroDiminishingWindow =>
                write!(f, "InvalidConfiguration: diminishing_window must be at least 1"),
            InvalidConfiguration::UnknownPlaceholder { stage, placeholder } =>
                write!(f, "InvalidConfiguration: the {} template uses unknown placeholder {{{{{}}}}}", stage, placeholder),
        }
    }
}

impl Error for InvalidConfiguration {}

/// Errors that end a run without any result.
#[derive(Debug, Clone, PartialEq)]
pub enum RefinementError {
    InvalidConfiguration(InvalidConfiguration),
    /// The index-0 artifact could not be generated or scored
    InitialGenerationFailed(GenerationError),
}

impl fmt::Display for RefinementError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RefinementError::InvalidConfiguration(err) => write!(f, "{}", err),
            RefinementError::InitialGenerationFailed(err) => write!(f, "InitialGenerationFailed: {}", err),
        }
    }
}

impl Error for RefinementError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RefinementError::InvalidConfiguration(err) => Some(err),
            RefinementError::InitialGenerationFailed(err) => Some(err),
        }
    }
}

impl From<InvalidConfiguration> for RefinementError {
    fn from(err: InvalidConfiguration) -> Self {
        RefinementError::InvalidConfiguration(err)
    }
}
