//! The two capabilities the refinement loop is driven by. The loop never knows how text is produced or scored.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::refine::errors::GenerationError;

/// Sampling parameters of one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub temperature: f32,
    pub max_output_tokens: u16,
    /// Optional system message sent ahead of the prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl GenerationParameters {
    pub fn new(temperature: f32, max_output_tokens: u16) -> Self {
        Self {
            temperature,
            max_output_tokens,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self::new(0.7, 1024)
    }
}

/// Inclusive range of the scores a [QualityScorer] produces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
}

impl ScoreRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// The 1 to 10 scale LLM self-assessments are usually asked for.
    pub fn one_to_ten() -> Self {
        Self::new(1.0, 10.0)
    }

    /// 0 to 1.
    pub fn unit() -> Self {
        Self::new(0.0, 1.0)
    }

    #[inline]
    pub fn contains(&self, score: f64) -> bool {
        score.is_finite() && self.min <= score && score <= self.max
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// A score together with what the scorer had to say about the artifact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    #[serde(default)]
    pub criteria_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub feedback: Option<String>,
}

impl Evaluation {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            ..Default::default()
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>, score: f64) -> Self {
        self.criteria_scores.insert(criterion.into(), score);
        self
    }

    /// Criterion scores and feedback as notes for the next critique. Empty when there is neither.
    pub fn notes(&self) -> String {
        let mut lines: Vec<String> = self
            .criteria_scores
            .iter()
            .map(|(criterion, score)| format!("- {}: {}", criterion, score))
            .collect();
        if let Some(feedback) = &self.feedback {
            lines.push(feedback.clone());
        }
        lines.join("\n")
    }
}

impl From<f64> for Evaluation {
    fn from(score: f64) -> Self {
        Self::new(score)
    }
}

/// Anything that turns a prompt into text, typically a hosted model endpoint.
///
/// Implementations enforce their own timeouts and report them as [GenerationError::Timeout].
#[async_trait]
pub trait TextGeneration: Send + Sync {
    async fn complete(&self, prompt: &str, params: &GenerationParameters) -> Result<String, GenerationError>;
}

/// Anything that rates an artifact against its task on a fixed [ScoreRange].
#[async_trait]
pub trait QualityScorer: Send + Sync {
    fn range(&self) -> ScoreRange;

    async fn score(&self, content: &str, task_description: &str) -> Result<f64, GenerationError>;

    /// Score plus criterion scores and feedback, for scorers that have them. The loop calls this one.
    async fn evaluate(&self, content: &str, task_description: &str) -> Result<Evaluation, GenerationError> {
        self.score(content, task_description).await.map(Evaluation::new)
    }
}

#[async_trait]
impl<'a, T: TextGeneration + ?Sized> TextGeneration for &'a T {
    async fn complete(&self, prompt: &str, params: &GenerationParameters) -> Result<String, GenerationError> {
        (**self).complete(prompt, params).await
    }
}

#[async_trait]
impl<T: TextGeneration + ?Sized> TextGeneration for Box<T> {
    async fn complete(&self, prompt: &str, params: &GenerationParameters) -> Result<String, GenerationError> {
        (**self).complete(prompt, params).await
    }
}

#[async_trait]
impl<T: TextGeneration + ?Sized> TextGeneration for Arc<T> {
    async fn complete(&self, prompt: &str, params: &GenerationParameters) -> Result<String, GenerationError> {
        (**self).complete(prompt, params).await
    }
}

#[async_trait]
impl<'a, T: QualityScorer + ?Sized> QualityScorer for &'a T {
    fn range(&self) -> ScoreRange {
        (**self).range()
    }

    async fn score(&self, content: &str, task_description: &str) -> Result<f64, GenerationError> {
        (**self).score(content, task_description).await
    }

    async fn evaluate(&self, content: &str, task_description: &str) -> Result<Evaluation, GenerationError> {
        (**self).evaluate(content, task_description).await
    }
}

#[async_trait]
impl<T: QualityScorer + ?Sized> QualityScorer for Box<T> {
    fn range(&self) -> ScoreRange {
        (**self).range()
    }

    async fn score(&self, content: &str, task_description: &str) -> Result<f64, GenerationError> {
        (**self).score(content, task_description).await
    }

    async fn evaluate(&self, content: &str, task_description: &str) -> Result<Evaluation, GenerationError> {
        (**self).evaluate(content, task_description).await
    }
}

#[async_trait]
impl<T: QualityScorer + ?Sized> QualityScorer for Arc<T> {
    fn range(&self) -> ScoreRange {
        (**self).range()
    }

    async fn score(&self, content: &str, task_description: &str) -> Result<f64, GenerationError> {
        (**self).score(content, task_description).await
    }

    async fn evaluate(&self, content: &str, task_description: &str) -> Result<Evaluation, GenerationError> {
        (**self).evaluate(content, task_description).await
    }
}
