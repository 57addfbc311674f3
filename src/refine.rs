//! # Refinement
//!
//! The recursive self-improvement loop: generate an artifact, then repeatedly critique it, plan improvements, apply
//! them and score the result, until the score reaches a threshold, the gains flatten out, or the pass budget runs out.
//!
//! The loop only orchestrates. Text comes from an injected [TextGeneration], scores from an injected
//! [QualityScorer], and the loop keeps no state between runs, so one [IterativeRefinementLoop] can serve concurrent
//! runs on separate tasks.
//!
//! Failures are handled by how much progress they would throw away:
//! * a bad [RunConfiguration] is rejected before any call is made,
//! * a failure while producing or scoring the first artifact fails the run,
//! * a failure in a later pass ends the run with [StopReason::GenerationFailure] and keeps every completed record.

pub mod capability;
pub mod cancel;
pub mod config;
pub mod errors;
pub mod record;
pub mod stages;

pub use capability::{Evaluation, GenerationParameters, QualityScorer, ScoreRange, TextGeneration};
pub use cancel::CancellationFlag;
pub use config::{ContinuationPolicy, RunConfiguration};
pub use errors::{GenerationError, InvalidConfiguration, RefinementError};
pub use record::{IterationRecord, RunResult, StopReason};
pub use stages::{PassContext, RefinementPrompts, Stage, StagePrompt};

use log::{debug, info, warn};

use crate::refine::record::best_index;
use crate::utils::postprocess::score::extract_bullet_items;

/// Most improvements kept per pass by the improvement analysis.
const MAX_IMPROVEMENTS_KEPT: usize = 5;

/// Drives bounded generate, critique, plan, apply and score cycles.
#[derive(Debug, Clone, Default)]
pub struct IterativeRefinementLoop {
    prompts: RefinementPrompts,
}

impl IterativeRefinementLoop {
    pub fn new(prompts: RefinementPrompts) -> Self {
        Self { prompts }
    }

    /// Run one refinement loop.
    ///
    /// `cancel` is checked before each refinement pass. A cancelled run returns what it has with
    /// [StopReason::Cancelled].
    pub async fn run<G, S>(&self,
                           config: &RunConfiguration,
                           generate: &G,
                           evaluate: &S,
                           cancel: Option<&CancellationFlag>) -> Result<RunResult, RefinementError>
        where G: TextGeneration + ?Sized,
              S: QualityScorer + ?Sized {
        let range = evaluate.range();
        config.validate(range)?;
        self.prompts.validate()?;

        info!("Starting refinement of task: {}", config.task_description);
        let initial = self
            .initial_record(config, generate, evaluate)
            .await
            .map_err(RefinementError::InitialGenerationFailed)?;
        info!("Iteration 0 scored {}", initial.quality_score);

        let mut records = vec![initial];
        let stop_reason = if initial_meets(&records, config) {
            StopReason::ThresholdReached
        } else {
            loop {
                if cancel.is_some_and(CancellationFlag::is_cancelled) {
                    info!("Cancellation observed before pass {}", records.len());
                    break StopReason::Cancelled;
                }
                let index = records.len();
                let starting_point = self.starting_point(&records, config.continuation);
                let content = starting_point.artifact().to_string();
                let notes = starting_point.evaluator_notes();
                match self.refine_once(index, content, &notes, config, generate, evaluate).await {
                    Ok(record) => {
                        info!("Iteration {} scored {}", index, record.quality_score);
                        records.push(record);
                    }
                    Err(err) => {
                        warn!("Refinement pass {} failed, keeping {} completed records: {}", index, records.len(), err);
                        return Ok(RunResult::new(records, StopReason::GenerationFailure, Some(err)));
                    }
                }
                if let Some(reason) = self.exit_condition(&records, config) {
                    break reason;
                }
            }
        };
        info!("Refinement stopped: {}", stop_reason.as_str());
        Ok(RunResult::new(records, stop_reason, None))
    }

    async fn initial_record<G, S>(&self, config: &RunConfiguration, generate: &G, evaluate: &S) -> Result<IterationRecord, GenerationError>
        where G: TextGeneration + ?Sized,
              S: QualityScorer + ?Sized {
        let context = PassContext {
            task: &config.task_description,
            requirements: &config.requirements,
            ..Default::default()
        };
        let content = self.generate_stage(Stage::Initial, &context, generate).await?;
        let evaluation = evaluate_checked(evaluate, &content, &config.task_description).await?;
        Ok(IterationRecord::initial(content, evaluation))
    }

    async fn refine_once<G, S>(&self,
                               index: usize,
                               content: String,
                               evaluator_notes: &str,
                               config: &RunConfiguration,
                               generate: &G,
                               evaluate: &S) -> Result<IterationRecord, GenerationError>
        where G: TextGeneration + ?Sized,
              S: QualityScorer + ?Sized {
        let mut context = PassContext {
            task: &config.task_description,
            requirements: &config.requirements,
            content: &content,
            feedback: evaluator_notes,
            iteration: index,
            ..Default::default()
        };
        let critique = self.generate_stage(Stage::Critique, &context, generate).await?;
        context.critique = &critique;
        let plan = self.generate_stage(Stage::Plan, &context, generate).await?;
        context.plan = &plan;
        let refined = self.generate_stage(Stage::Apply, &context, generate).await?;
        let evaluation = evaluate_checked(evaluate, &refined, &config.task_description).await?;

        let improvements_made = if config.analyze_improvements {
            context.improved = &refined;
            match self.generate_stage(Stage::Analysis, &context, generate).await {
                Ok(reply) => extract_bullet_items(&reply, MAX_IMPROVEMENTS_KEPT),
                Err(err) => {
                    warn!("Improvement analysis of pass {} failed: {}", index, err);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(IterationRecord::refinement(index, content, critique, plan, refined, evaluation, improvements_made))
    }

    async fn generate_stage<G>(&self, stage: Stage, context: &PassContext<'_>, generate: &G) -> Result<String, GenerationError>
        where G: TextGeneration + ?Sized {
        let stage_prompt = self.prompts.stage(stage);
        let prompt = stage_prompt
            .render(context)
            .map_err(|err| GenerationError::Other(format!("cannot render the {} prompt: {}", stage, err)))?;
        debug!("Sending {} prompt of iteration {}", stage, context.iteration);
        generate.complete(&prompt, &stage_prompt.params).await
    }

    fn starting_point<'r>(&self, records: &'r [IterationRecord], policy: ContinuationPolicy) -> &'r IterationRecord {
        match policy {
            ContinuationPolicy::Latest => &records[records.len() - 1],
            ContinuationPolicy::Best => &records[best_index(records)],
        }
    }

    /// Exit conditions checked after each appended pass, in priority order.
    fn exit_condition(&self, records: &[IterationRecord], config: &RunConfiguration) -> Option<StopReason> {
        let best_score = records[best_index(records)].quality_score;
        if best_score >= config.quality_threshold {
            Some(StopReason::ThresholdReached)
        } else if diminishing_returns(records, config) {
            Some(StopReason::DiminishingReturns)
        } else if records.len() > config.max_iterations {
            Some(StopReason::MaxIterationsReached)
        } else {
            None
        }
    }
}

fn initial_meets(records: &[IterationRecord], config: &RunConfiguration) -> bool {
    records[0].quality_score >= config.quality_threshold
}

/// True when the last `diminishing_window` score deltas all fall below `min_improvement_delta`.
fn diminishing_returns(records: &[IterationRecord], config: &RunConfiguration) -> bool {
    let Some(min_delta) = config.min_improvement_delta else {
        return false;
    };
    let window = config.diminishing_window;
    if records.len() < window + 1 {
        return false;
    }
    records[records.len() - window - 1..]
        .windows(2)
        .all(|pair| pair[1].quality_score - pair[0].quality_score < min_delta)
}

async fn evaluate_checked<S>(evaluate: &S, content: &str, task_description: &str) -> Result<Evaluation, GenerationError>
    where S: QualityScorer + ?Sized {
    let evaluation = evaluate.evaluate(content, task_description).await?;
    let range = evaluate.range();
    if range.contains(evaluation.score) {
        Ok(evaluation)
    } else {
        Err(GenerationError::MalformedResponse(format!("score {} is outside the declared range [{}, {}]", evaluation.score, range.min, range.max)))
    }
}

#[cfg(test)]
mod test_refine;
