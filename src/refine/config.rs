use serde::{Deserialize, Serialize};

use crate::refine::capability::ScoreRange;
use crate::refine::errors::InvalidConfiguration;

/// Which artifact the next refinement pass starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationPolicy {
    /// Always refine the artifact the previous pass produced, even when its score regressed
    #[default]
    Latest,
    /// Refine the best-scoring artifact so far, ties going to the latest
    Best,
}

/// Configuration of one run. It is never mutated by the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub task_description: String,
    /// Extra constraints appended to the task when generating the first artifact
    #[serde(default)]
    pub requirements: String,
    #[serde(default = "RunConfiguration::default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "RunConfiguration::default_quality_threshold")]
    pub quality_threshold: f64,
    /// Stop once the score gain stays below this for `diminishing_window` consecutive passes
    #[serde(default)]
    pub min_improvement_delta: Option<f64>,
    #[serde(default = "RunConfiguration::default_diminishing_window")]
    pub diminishing_window: usize,
    #[serde(default)]
    pub continuation: ContinuationPolicy,
    /// Ask the model to list the improvements each pass made
    #[serde(default)]
    pub analyze_improvements: bool,
}

impl RunConfiguration {
    const DEFAULT_MAX_ITERATIONS: usize = 3;
    const DEFAULT_QUALITY_THRESHOLD: f64 = 8.0;
    const DEFAULT_DIMINISHING_WINDOW: usize = 2;

    fn default_max_iterations() -> usize {
        Self::DEFAULT_MAX_ITERATIONS
    }

    fn default_quality_threshold() -> f64 {
        Self::DEFAULT_QUALITY_THRESHOLD
    }

    fn default_diminishing_window() -> usize {
        Self::DEFAULT_DIMINISHING_WINDOW
    }

    pub fn new(task_description: impl Into<String>) -> Self {
        Self {
            task_description: task_description.into(),
            requirements: String::new(),
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            quality_threshold: Self::DEFAULT_QUALITY_THRESHOLD,
            min_improvement_delta: None,
            diminishing_window: Self::DEFAULT_DIMINISHING_WINDOW,
            continuation: ContinuationPolicy::default(),
            analyze_improvements: false,
        }
    }

    pub fn with_requirements(mut self, requirements: impl Into<String>) -> Self {
        self.requirements = requirements.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_quality_threshold(mut self, quality_threshold: f64) -> Self {
        self.quality_threshold = quality_threshold;
        self
    }

    pub fn with_min_improvement_delta(mut self, min_improvement_delta: f64) -> Self {
        self.min_improvement_delta = Some(min_improvement_delta);
        self
    }

    pub fn with_diminishing_window(mut self, diminishing_window: usize) -> Self {
        self.diminishing_window = diminishing_window;
        self
    }

    pub fn with_continuation(mut self, continuation: ContinuationPolicy) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn with_improvement_analysis(mut self, analyze_improvements: bool) -> Self {
        self.analyze_improvements = analyze_improvements;
        self
    }

    /// Checks the configuration against the range of the scorer that will be used.
    pub fn validate(&self, range: ScoreRange) -> Result<(), InvalidConfiguration> {
        if self.max_iterations < 1 {
            return Err(InvalidConfiguration::ZeroMaxIterations);
        }
        if !range.contains(self.quality_threshold) {
            return Err(InvalidConfiguration::ThresholdOutOfRange {
                threshold: self.quality_threshold,
                min: range.min,
                max: range.max,
            });
        }
        if let Some(delta) = self.min_improvement_delta {
            if !delta.is_finite() || delta < 0.0 {
                return Err(InvalidConfiguration::InvalidImprovementDelta(delta));
            }
        }
        if self.diminishing_window < 1 {
            return Err(InvalidConfiguration::ZeroDiminishingWindow);
        }
        Ok(())
    }
}
