use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::refine::capability::Evaluation;
use crate::refine::errors::GenerationError;

/// One pass of the loop. Index 0 is the initial generation, index k is the k-th refinement pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[readonly::make]
pub struct IterationRecord {
    pub index: usize,
    /// The artifact this pass started from, or the initial artifact at index 0
    pub content: String,
    pub critique: Option<String>,
    pub improvement_plan: Option<String>,
    /// Score of [IterationRecord::artifact]
    pub quality_score: f64,
    pub refined_content: Option<String>,
    pub improvements_made: Vec<String>,
    /// Per-criterion scores of the artifact, when the scorer reports them
    #[serde(default)]
    pub criteria_scores: BTreeMap<String, f64>,
    /// What the scorer said about the artifact, passed on to the next critique
    #[serde(default)]
    pub evaluator_feedback: Option<String>,
}

impl IterationRecord {
    pub(crate) fn initial(content: String, evaluation: impl Into<Evaluation>) -> Self {
        let evaluation = evaluation.into();
        Self {
            index: 0,
            content,
            critique: None,
            improvement_plan: None,
            quality_score: evaluation.score,
            refined_content: None,
            improvements_made: Vec::new(),
            criteria_scores: evaluation.criteria_scores,
            evaluator_feedback: evaluation.feedback,
        }
    }

    pub(crate) fn refinement(index: usize,
                             content: String,
                             critique: String,
                             improvement_plan: String,
                             refined_content: String,
                             evaluation: impl Into<Evaluation>,
                             improvements_made: Vec<String>) -> Self {
        let evaluation = evaluation.into();
        Self {
            index,
            content,
            critique: Some(critique),
            improvement_plan: Some(improvement_plan),
            quality_score: evaluation.score,
            refined_content: Some(refined_content),
            improvements_made,
            criteria_scores: evaluation.criteria_scores,
            evaluator_feedback: evaluation.feedback,
        }
    }

    /// The text that was scored: the refined content, or the initial content at index 0.
    pub fn artifact(&self) -> &str {
        self.refined_content.as_deref().unwrap_or(&self.content)
    }

    /// Criterion scores and feedback of [IterationRecord::artifact], one per line. Empty when the scorer gave none.
    pub fn evaluator_notes(&self) -> String {
        let evaluation = Evaluation {
            score: self.quality_score,
            criteria_scores: self.criteria_scores.clone(),
            feedback: self.evaluator_feedback.clone(),
        };
        evaluation.notes()
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    ThresholdReached,
    MaxIterationsReached,
    DiminishingReturns,
    GenerationFailure,
    Cancelled,
}

impl StopReason {
    /// Convergence as opposed to forced termination.
    pub fn is_clean_convergence(&self) -> bool {
        matches!(self, StopReason::ThresholdReached | StopReason::DiminishingReturns)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::ThresholdReached => "threshold-reached",
            StopReason::MaxIterationsReached => "max-iterations-reached",
            StopReason::DiminishingReturns => "diminishing-returns",
            StopReason::GenerationFailure => "generation-failure",
            StopReason::Cancelled => "cancelled",
        }
    }
}

/// The trace of a finished run and its best artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[readonly::make]
pub struct RunResult {
    /// Never empty
    pub iterations: Vec<IterationRecord>,
    pub best_iteration_index: usize,
    pub stop_reason: StopReason,
    /// The error that ended the run when `stop_reason` is [StopReason::GenerationFailure]
    pub failure: Option<GenerationError>,
}

impl RunResult {
    pub(crate) fn new(iterations: Vec<IterationRecord>, stop_reason: StopReason, failure: Option<GenerationError>) -> Self {
        debug_assert!(!iterations.is_empty());
        let best_iteration_index = best_index(&iterations);
        Self {
            iterations,
            best_iteration_index,
            stop_reason,
            failure,
        }
    }

    pub fn best(&self) -> &IterationRecord {
        &self.iterations[self.best_iteration_index]
    }

    pub fn best_artifact(&self) -> &str {
        self.best().artifact()
    }

    pub fn final_record(&self) -> &IterationRecord {
        &self.iterations[self.iterations.len() - 1]
    }

    /// Number of refinement passes that completed.
    pub fn refinement_passes(&self) -> usize {
        self.iterations.len() - 1
    }

    /// Best score minus the score of the initial artifact.
    pub fn quality_improvement(&self) -> f64 {
        self.best().quality_score - self.iterations[0].quality_score
    }

    pub fn converged(&self) -> bool {
        self.stop_reason.is_clean_convergence()
    }
}

/// Arg-max of the quality scores, ties going to the highest index. Zero for an empty slice.
pub(crate) fn best_index(records: &[IterationRecord]) -> usize {
    let mut best = 0;
    for (idx, record) in records.iter().enumerate() {
        if record.quality_score >= records[best].quality_score {
            best = idx;
        }
    }
    best
}
