use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::*;

/// Replies through a closure of (call number, prompt) and remembers every prompt.
struct FnGenerator<F> {
    reply: F,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl<F> FnGenerator<F>
    where F: Fn(usize, &str) -> Result<String, GenerationError> + Send + Sync {
    fn new(reply: F) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl<F> TextGeneration for FnGenerator<F>
    where F: Fn(usize, &str) -> Result<String, GenerationError> + Send + Sync {
    async fn complete(&self, prompt: &str, _params: &GenerationParameters) -> Result<String, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.reply)(call, prompt)
    }
}

fn numbered_generator() -> FnGenerator<impl Fn(usize, &str) -> Result<String, GenerationError> + Send + Sync> {
    FnGenerator::new(|call, _| Ok(format!("reply {}", call)))
}

fn failing_generator(fail_on_call: usize) -> FnGenerator<impl Fn(usize, &str) -> Result<String, GenerationError> + Send + Sync> {
    FnGenerator::new(move |call, _| if call == fail_on_call {
        Err(GenerationError::RateLimited("429".to_string()))
    } else {
        Ok(format!("reply {}", call))
    })
}

/// Hands out scripted scores in call order; runs out as a failure.
struct ScriptedScorer {
    scores: Vec<Result<f64, GenerationError>>,
    range: ScoreRange,
    calls: AtomicUsize,
    scored: Mutex<Vec<String>>,
}

impl ScriptedScorer {
    fn new(scores: &[f64]) -> Self {
        Self::with_results(scores.iter().map(|s| Ok(*s)).collect())
    }

    fn with_results(scores: Vec<Result<f64, GenerationError>>) -> Self {
        Self {
            scores,
            range: ScoreRange::new(0.0, 10.0),
            calls: AtomicUsize::new(0),
            scored: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QualityScorer for ScriptedScorer {
    fn range(&self) -> ScoreRange {
        self.range
    }

    async fn score(&self, content: &str, _task_description: &str) -> Result<f64, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.scored.lock().unwrap().push(content.to_string());
        self.scores
            .get(call)
            .cloned()
            .unwrap_or_else(|| Err(GenerationError::Other("script exhausted".to_string())))
    }
}

fn scores_of(result: &RunResult) -> Vec<f64> {
    result.iterations.iter().map(|r| r.quality_score).collect()
}

#[tokio::test]
async fn test_runs_all_passes_and_breaks_ties_to_latest() {
    let config = RunConfiguration::new("story").with_max_iterations(3).with_quality_threshold(9.0);
    let generator = numbered_generator();
    let scorer = ScriptedScorer::new(&[3.0, 5.0, 5.0, 5.0]);
    let result = IterativeRefinementLoop::default().run(&config, &generator, &scorer, None).await.unwrap();

    assert_eq!(4, result.iterations.len());
    assert_eq!(StopReason::MaxIterationsReached, result.stop_reason);
    assert_eq!(3, result.best_iteration_index);
    assert_eq!(None, result.failure);
    assert_eq!(1 + 3 * 3, generator.calls());
    assert_eq!(4, scorer.calls());
}

#[tokio::test]
async fn test_stops_on_threshold() {
    let config = RunConfiguration::new("story").with_max_iterations(5).with_quality_threshold(8.0);
    let generator = numbered_generator();
    let scorer = ScriptedScorer::new(&[4.0, 9.0]);
    let result = IterativeRefinementLoop::default().run(&config, &generator, &scorer, None).await.unwrap();

    assert_eq!(2, result.iterations.len());
    assert_eq!(StopReason::ThresholdReached, result.stop_reason);
    assert_eq!(1, result.best_iteration_index);
    assert!(result.converged());
    assert_eq!(2, scorer.calls());
}

#[tokio::test]
async fn test_initial_artifact_already_good_enough() {
    let config = RunConfiguration::new("story").with_quality_threshold(8.0);
    let generator = numbered_generator();
    let scorer = ScriptedScorer::new(&[8.0]);
    let result = IterativeRefinementLoop::default().run(&config, &generator, &scorer, None).await.unwrap();

    assert_eq!(1, result.iterations.len());
    assert_eq!(StopReason::ThresholdReached, result.stop_reason);
    assert_eq!(1, generator.calls());
    assert_eq!("reply 0", result.best_artifact());
}

#[tokio::test]
async fn test_stops_on_diminishing_returns() {
    let config = RunConfiguration::new("story")
        .with_max_iterations(10)
        .with_quality_threshold(9.0)
        .with_min_improvement_delta(0.1)
        .with_diminishing_window(2);
    let generator = numbered_generator();
    let scorer = ScriptedScorer::new(&[5.0, 5.05, 5.08, 9.5]);
    let result = IterativeRefinementLoop::default().run(&config, &generator, &scorer, None).await.unwrap();

    assert_eq!(3, result.iterations.len());
    assert_eq!(StopReason::DiminishingReturns, result.stop_reason);
    assert_eq!(2, result.best_iteration_index);
    assert!(result.converged());
}

#[tokio::test]
async fn test_one_small_delta_is_not_a_plateau() {
    let config = RunConfiguration::new("story")
        .with_max_iterations(3)
        .with_quality_threshold(9.5)
        .with_min_improvement_delta(0.5);
    let scorer = ScriptedScorer::new(&[2.0, 2.1, 4.0, 4.2]);
    let result = IterativeRefinementLoop::default().run(&config, &numbered_generator(), &scorer, None).await.unwrap();

    assert_eq!(vec![2.0, 2.1, 4.0, 4.2], scores_of(&result));
    assert_eq!(StopReason::MaxIterationsReached, result.stop_reason);
}

#[tokio::test]
async fn test_regressions_count_as_no_improvement() {
    let config = RunConfiguration::new("story")
        .with_max_iterations(5)
        .with_quality_threshold(9.0)
        .with_min_improvement_delta(0.0)
        .with_diminishing_window(1);
    let scorer = ScriptedScorer::new(&[6.0, 5.0]);
    let result = IterativeRefinementLoop::default().run(&config, &numbered_generator(), &scorer, None).await.unwrap();

    assert_eq!(StopReason::DiminishingReturns, result.stop_reason);
    assert_eq!(0, result.best_iteration_index);
    assert_eq!("reply 0", result.best_artifact());
}

#[tokio::test]
async fn test_threshold_wins_over_diminishing_returns() {
    let config = RunConfiguration::new("story")
        .with_max_iterations(1)
        .with_quality_threshold(5.0)
        .with_min_improvement_delta(1.0)
        .with_diminishing_window(1);
    let scorer = ScriptedScorer::new(&[4.8, 5.0]);
    let result = IterativeRefinementLoop::default().run(&config, &numbered_generator(), &scorer, None).await.unwrap();

    assert_eq!(StopReason::ThresholdReached, result.stop_reason);
}

#[tokio::test]
async fn test_length_bounded_by_max_iterations() {
    for max_iterations in 1..=5 {
        let config = RunConfiguration::new("story").with_max_iterations(max_iterations).with_quality_threshold(10.0);
        let scores: Vec<f64> = (0..=max_iterations).map(|i| 1.0 + i as f64).collect();
        let scorer = ScriptedScorer::new(&scores);
        let result = IterativeRefinementLoop::default().run(&config, &numbered_generator(), &scorer, None).await.unwrap();
        assert_eq!(max_iterations + 1, result.iterations.len());
        assert_eq!(max_iterations, result.best_iteration_index);
        assert_eq!(StopReason::MaxIterationsReached, result.stop_reason);
    }
}

#[tokio::test]
async fn test_generation_failure_keeps_completed_passes() {
    for failing_pass in 1..=3usize {
        let config = RunConfiguration::new("story").with_max_iterations(5).with_quality_threshold(9.0);
        // one initial call, then critique, plan and apply per pass
        let generator = failing_generator(1 + 3 * (failing_pass - 1));
        let scorer = ScriptedScorer::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let result = IterativeRefinementLoop::default().run(&config, &generator, &scorer, None).await.unwrap();

        assert_eq!(failing_pass, result.iterations.len());
        assert_eq!(StopReason::GenerationFailure, result.stop_reason);
        assert_eq!(Some(GenerationError::RateLimited("429".to_string())), result.failure);
        assert!(!result.converged());
    }
}

#[tokio::test]
async fn test_failure_in_plan_stage() {
    let config = RunConfiguration::new("story").with_max_iterations(3).with_quality_threshold(9.0);
    let generator = failing_generator(2);
    let scorer = ScriptedScorer::new(&[3.0, 4.0]);
    let result = IterativeRefinementLoop::default().run(&config, &generator, &scorer, None).await.unwrap();

    assert_eq!(1, result.iterations.len());
    assert_eq!(StopReason::GenerationFailure, result.stop_reason);
    assert_eq!(1, scorer.calls());
}

#[tokio::test]
async fn test_scoring_failure_mid_run() {
    let config = RunConfiguration::new("story").with_max_iterations(4).with_quality_threshold(9.0);
    let scorer = ScriptedScorer::with_results(vec![
        Ok(3.0),
        Ok(4.0),
        Err(GenerationError::Timeout("scorer".to_string())),
    ]);
    let result = IterativeRefinementLoop::default().run(&config, &numbered_generator(), &scorer, None).await.unwrap();

    assert_eq!(vec![3.0, 4.0], scores_of(&result));
    assert_eq!(StopReason::GenerationFailure, result.stop_reason);
    assert_eq!(1, result.best_iteration_index);
}

#[tokio::test]
async fn test_out_of_range_score_is_a_failure() {
    let config = RunConfiguration::new("story").with_max_iterations(4).with_quality_threshold(9.0);
    let scorer = ScriptedScorer::new(&[3.0, 42.0]);
    let result = IterativeRefinementLoop::default().run(&config, &numbered_generator(), &scorer, None).await.unwrap();

    assert_eq!(1, result.iterations.len());
    assert!(matches!(result.failure, Some(GenerationError::MalformedResponse(_))));

    let scorer = ScriptedScorer::new(&[f64::NAN]);
    let err = IterativeRefinementLoop::default().run(&config, &numbered_generator(), &scorer, None).await.unwrap_err();
    assert!(matches!(err, RefinementError::InitialGenerationFailed(GenerationError::MalformedResponse(_))));
}

#[tokio::test]
async fn test_initial_failures_are_fatal() {
    let config = RunConfiguration::new("story");
    let scorer = ScriptedScorer::new(&[5.0]);
    let err = IterativeRefinementLoop::default().run(&config, &failing_generator(0), &scorer, None).await.unwrap_err();
    assert_eq!(RefinementError::InitialGenerationFailed(GenerationError::RateLimited("429".to_string())), err);

    let scorer = ScriptedScorer::with_results(vec![Err(GenerationError::Authentication("bad key".to_string()))]);
    let err = IterativeRefinementLoop::default().run(&config, &numbered_generator(), &scorer, None).await.unwrap_err();
    assert_eq!(RefinementError::InitialGenerationFailed(GenerationError::Authentication("bad key".to_string())), err);
}

#[tokio::test]
async fn test_invalid_configuration_makes_no_calls() {
    let generator = numbered_generator();
    let scorer = ScriptedScorer::new(&[5.0]);
    let refinement = IterativeRefinementLoop::default();

    let err = refinement.run(&RunConfiguration::new("t").with_max_iterations(0), &generator, &scorer, None).await.unwrap_err();
    assert_eq!(RefinementError::InvalidConfiguration(InvalidConfiguration::ZeroMaxIterations), err);

    let err = refinement.run(&RunConfiguration::new("t").with_quality_threshold(10.5), &generator, &scorer, None).await.unwrap_err();
    assert!(matches!(err, RefinementError::InvalidConfiguration(InvalidConfiguration::ThresholdOutOfRange { .. })));

    let bad_prompts = RefinementPrompts::default()
        .with_stage(Stage::Apply, StagePrompt::new(Stage::Apply, "{{plan}} with {{persona}}", GenerationParameters::default()));
    let err = IterativeRefinementLoop::new(bad_prompts).run(&RunConfiguration::new("t"), &generator, &scorer, None).await.unwrap_err();
    assert!(matches!(err, RefinementError::InvalidConfiguration(InvalidConfiguration::UnknownPlaceholder { .. })));

    assert_eq!(0, generator.calls());
    assert_eq!(0, scorer.calls());
}

#[tokio::test]
async fn test_cancelled_before_first_pass() {
    let flag = CancellationFlag::new();
    flag.cancel();
    let config = RunConfiguration::new("story").with_quality_threshold(9.0);
    let generator = numbered_generator();
    let scorer = ScriptedScorer::new(&[3.0, 4.0]);
    let result = IterativeRefinementLoop::default().run(&config, &generator, &scorer, Some(&flag)).await.unwrap();

    assert_eq!(1, result.iterations.len());
    assert_eq!(StopReason::Cancelled, result.stop_reason);
    assert_eq!(1, generator.calls());
}

#[tokio::test]
async fn test_cancellation_mid_pass_completes_the_pass() {
    let flag = CancellationFlag::new();
    let handle = flag.clone();
    // cancel while the first pass is planning
    let generator = FnGenerator::new(move |call, _| {
        if call == 2 {
            handle.cancel();
        }
        Ok(format!("reply {}", call))
    });
    let config = RunConfiguration::new("story").with_max_iterations(5).with_quality_threshold(9.0);
    let scorer = ScriptedScorer::new(&[3.0, 4.0, 5.0]);
    let result = IterativeRefinementLoop::default().run(&config, &generator, &scorer, Some(&flag)).await.unwrap();

    assert_eq!(2, result.iterations.len());
    assert_eq!(StopReason::Cancelled, result.stop_reason);
    assert_eq!(Some("reply 3"), result.iterations[1].refined_content.as_deref());
    assert_eq!(4, generator.calls());
}

#[tokio::test]
async fn test_continuation_policies() {
    let scores = [3.0, 7.0, 4.0, 5.0];
    let base = RunConfiguration::new("story").with_max_iterations(3).with_quality_threshold(9.0);

    let latest = IterativeRefinementLoop::default()
        .run(&base, &numbered_generator(), &ScriptedScorer::new(&scores), None)
        .await
        .unwrap();
    // artifacts: 0 -> "reply 0", pass k -> "reply {3k}"
    assert_eq!("reply 6", latest.iterations[3].content);

    let best_config = base.clone().with_continuation(ContinuationPolicy::Best);
    let best = IterativeRefinementLoop::default()
        .run(&best_config, &numbered_generator(), &ScriptedScorer::new(&scores), None)
        .await
        .unwrap();
    assert_eq!("reply 3", best.iterations[3].content);
    assert_eq!(1, best.best_iteration_index);
}

#[tokio::test]
async fn test_records_chain_and_prompts() {
    let config = RunConfiguration::new("write a haiku")
        .with_requirements("about autumn")
        .with_max_iterations(2)
        .with_quality_threshold(9.0);
    let generator = numbered_generator();
    let scorer = ScriptedScorer::new(&[3.0, 4.0, 5.0]);
    let result = IterativeRefinementLoop::default().run(&config, &generator, &scorer, None).await.unwrap();

    let first = &result.iterations[0];
    assert_eq!((0, "reply 0", None, None, None), (first.index, first.content.as_str(), first.critique.as_deref(), first.improvement_plan.as_deref(), first.refined_content.as_deref()));

    let pass = &result.iterations[1];
    assert_eq!("reply 0", pass.content);
    assert_eq!(Some("reply 1"), pass.critique.as_deref());
    assert_eq!(Some("reply 2"), pass.improvement_plan.as_deref());
    assert_eq!(Some("reply 3"), pass.refined_content.as_deref());
    assert_eq!(result.iterations[1].artifact(), result.iterations[2].content);

    let prompts = generator.prompts();
    assert!(prompts[0].contains("write a haiku") && prompts[0].contains("Requirements: about autumn"));
    assert!(prompts[1].contains("iteration 1") && prompts[1].contains("reply 0"));
    assert!(prompts[2].contains("SELF-CRITIQUE: reply 1"));
    assert!(prompts[3].contains("IMPROVEMENT PLAN: reply 2") && prompts[3].contains("CURRENT CONTENT: reply 0"));
    assert_eq!(vec!["reply 0", "reply 3", "reply 6"], *scorer.scored.lock().unwrap());
}

#[tokio::test]
async fn test_improvement_analysis() {
    let generator = FnGenerator::new(|call, prompt| {
        if prompt.starts_with("Compare the two versions") {
            Ok("- Added imagery\n- Fixed syllable count".to_string())
        } else {
            Ok(format!("reply {}", call))
        }
    });
    let config = RunConfiguration::new("haiku").with_max_iterations(1).with_quality_threshold(9.0).with_improvement_analysis(true);
    let result = IterativeRefinementLoop::default().run(&config, &generator, &ScriptedScorer::new(&[3.0, 4.0]), None).await.unwrap();

    assert_eq!(vec!["Added imagery", "Fixed syllable count"], result.iterations[1].improvements_made);
    assert_eq!(5, generator.calls());
}

#[tokio::test]
async fn test_failed_improvement_analysis_is_not_fatal() {
    let generator = FnGenerator::new(|call, prompt| {
        if prompt.starts_with("Compare the two versions") {
            Err(GenerationError::Timeout("analysis".to_string()))
        } else {
            Ok(format!("reply {}", call))
        }
    });
    let config = RunConfiguration::new("haiku").with_max_iterations(2).with_quality_threshold(9.0).with_improvement_analysis(true);
    let result = IterativeRefinementLoop::default().run(&config, &generator, &ScriptedScorer::new(&[3.0, 4.0, 5.0]), None).await.unwrap();

    assert_eq!(StopReason::MaxIterationsReached, result.stop_reason);
    assert!(result.iterations.iter().all(|r| r.improvements_made.is_empty()));
}

#[tokio::test]
async fn test_concurrent_runs_share_one_loop() {
    let refinement = IterativeRefinementLoop::default();
    let config_a = RunConfiguration::new("a").with_max_iterations(2).with_quality_threshold(9.0);
    let config_b = RunConfiguration::new("b").with_max_iterations(3).with_quality_threshold(6.0);
    let (gen_a, gen_b) = (numbered_generator(), numbered_generator());
    let (scorer_a, scorer_b) = (ScriptedScorer::new(&[1.0, 2.0, 3.0]), ScriptedScorer::new(&[1.0, 6.0]));

    let (a, b) = futures::join!(
        refinement.run(&config_a, &gen_a, &scorer_a, None),
        refinement.run(&config_b, &gen_b, &scorer_b, None),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!((3, StopReason::MaxIterationsReached), (a.iterations.len(), a.stop_reason));
    assert_eq!((2, StopReason::ThresholdReached), (b.iterations.len(), b.stop_reason));
}

#[tokio::test]
async fn test_boxed_capabilities() {
    let generator: Box<dyn TextGeneration> = Box::new(numbered_generator());
    let scorer: std::sync::Arc<dyn QualityScorer> = std::sync::Arc::new(ScriptedScorer::new(&[2.0, 9.0]));
    let config = RunConfiguration::new("story").with_quality_threshold(8.0);
    let result = IterativeRefinementLoop::default().run(&config, &generator, &scorer, None).await.unwrap();
    assert_eq!(StopReason::ThresholdReached, result.stop_reason);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!("threshold-reached", json["stop_reason"]);
    assert_eq!(1, json["best_iteration_index"]);
}

/// Evaluates with feedback naming the scored content.
struct ReviewingScorer {
    scores: Vec<f64>,
    calls: AtomicUsize,
}

#[async_trait]
impl QualityScorer for ReviewingScorer {
    fn range(&self) -> ScoreRange {
        ScoreRange::one_to_ten()
    }

    async fn score(&self, content: &str, task_description: &str) -> Result<f64, GenerationError> {
        self.evaluate(content, task_description).await.map(|evaluation| evaluation.score)
    }

    async fn evaluate(&self, content: &str, _task_description: &str) -> Result<Evaluation, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Evaluation::new(self.scores[call])
            .with_criterion("clarity", self.scores[call])
            .with_feedback(format!("fix the ending of {}", content)))
    }
}

#[tokio::test]
async fn test_evaluator_feedback_reaches_the_next_critique() {
    let config = RunConfiguration::new("haiku").with_max_iterations(2).with_quality_threshold(9.0);
    let generator = numbered_generator();
    let scorer = ReviewingScorer { scores: vec![3.0, 4.0, 5.0], calls: AtomicUsize::new(0) };
    let result = IterativeRefinementLoop::default().run(&config, &generator, &scorer, None).await.unwrap();

    assert_eq!(Some("fix the ending of reply 0"), result.iterations[0].evaluator_feedback.as_deref());
    assert_eq!(Some(&4.0), result.iterations[1].criteria_scores.get("clarity"));

    let prompts = generator.prompts();
    assert!(prompts[1].contains("EVALUATOR FEEDBACK:\n- clarity: 3\nfix the ending of reply 0"));
    assert!(prompts[4].contains("EVALUATOR FEEDBACK:\n- clarity: 4\nfix the ending of reply 3"));
    assert!(!prompts[2].contains("EVALUATOR FEEDBACK"));
}
