//! Ready-made [QualityScorer]s.

use std::collections::BTreeMap;

use async_trait::async_trait;
use log::debug;
use regex::Regex;

use crate::prompt::PromptTemplate;
use crate::refine::{Evaluation, GenerationError, GenerationParameters, QualityScorer, ScoreRange, TextGeneration};
use crate::utils::postprocess::score::extract_evaluation;

const DEFAULT_CRITERIA: [&str; 5] = ["accuracy", "completeness", "clarity", "structure", "engagement"];

/// Fill `values` into `template` and complete it.
fn render(template: &PromptTemplate, values: &[(&str, &str)]) -> Result<String, GenerationError> {
    let mut prompt = template.construct_prompt();
    for (placeholder, value) in values {
        prompt
            .try_fill(*placeholder, *value)
            .map_err(|err| GenerationError::Other(err.to_string()))?;
    }
    prompt.complete().map_err(|err| GenerationError::Other(err.to_string()))
}

fn criteria_list(criteria: &[String]) -> String {
    criteria.iter().map(|c| format!("- {}", c)).collect::<Vec<_>>().join("\n")
}

/// Ask `generator` for a rubric reply and parse it.
async fn assess<G>(generator: &G, prompt: &str, params: &GenerationParameters, range: ScoreRange) -> Result<Evaluation, GenerationError>
    where G: TextGeneration + ?Sized {
    let reply = generator.complete(prompt, params).await?;
    extract_evaluation(&reply, range)
        .ok_or_else(|| GenerationError::MalformedResponse(format!("no score found in evaluation:\n{}", reply)))
}

/// Scores by asking a model to assess the content, like a reviewer filling in a rubric.
///
/// Criterion scores and the `FEEDBACK:` section of the reply come back in the [Evaluation], so the next critique sees
/// them.
pub struct SelfAssessmentScorer<G> {
    generator: G,
    criteria: Vec<String>,
    template: PromptTemplate,
    params: GenerationParameters,
}

impl<G: TextGeneration> SelfAssessmentScorer<G> {
    const EVALUATION_TEMPLATE_STR: &'static str = r#"Evaluate how well the content below accomplishes its task.

TASK:
{{task}}

CONTENT:
{{content}}

Evaluation criteria:
{{criteria}}

For each criterion give a score from 1 to 10 and a short explanation, then an overall score from 1 to 10 and suggestions for improvement.

Format your response as:
CRITERION SCORES:
[criterion name]: [score]/10 - [explanation]

OVERALL SCORE: [score]/10

FEEDBACK:
[detailed feedback and suggestions for improvement]"#;

    pub fn new(generator: G) -> Self {
        Self {
            generator,
            criteria: DEFAULT_CRITERIA.into_iter().map(String::from).collect(),
            template: PromptTemplate::new(Self::EVALUATION_TEMPLATE_STR),
            params: GenerationParameters::new(0.2, 600)
                .with_system_prompt("You are an expert evaluator. Provide objective, constructive scores."),
        }
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String> {
        self.criteria = criteria.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl<G: TextGeneration> QualityScorer for SelfAssessmentScorer<G> {
    fn range(&self) -> ScoreRange {
        ScoreRange::one_to_ten()
    }

    async fn score(&self, content: &str, task_description: &str) -> Result<f64, GenerationError> {
        self.evaluate(content, task_description).await.map(|evaluation| evaluation.score)
    }

    async fn evaluate(&self, content: &str, task_description: &str) -> Result<Evaluation, GenerationError> {
        let criteria = criteria_list(&self.criteria);
        let prompt = render(&self.template, &[("task", task_description), ("content", content), ("criteria", criteria.as_str())])?;
        assess(&self.generator, &prompt, &self.params, self.range()).await
    }
}

/// Scores a prompt by what it produces: the content is run as a prompt on every test case, each reply is assessed
/// against the criteria, and the scores are averaged.
///
/// `{{input}}` in the content is replaced by the test case, otherwise the test case is appended as `Input: ...`.
/// The feedback of the worst-scoring test case is kept. Scoring fails when there are no test cases.
pub struct TestCaseScorer<G> {
    generator: G,
    test_cases: Vec<String>,
    criteria: Vec<String>,
    template: PromptTemplate,
    run_params: GenerationParameters,
    assess_params: GenerationParameters,
}

impl<G: TextGeneration> TestCaseScorer<G> {
    const EVALUATION_TEMPLATE_STR: &'static str = r#"Evaluate the effectiveness of this prompt and its generated response.

PURPOSE OF THE PROMPT:
{{task}}

PROMPT:
{{prompt}}

TEST INPUT:
{{input}}

GENERATED RESPONSE:
{{response}}

Evaluation criteria:
{{criteria}}

For each criterion, provide a score from 1 to 10 and a brief explanation. Then provide an overall score from 1 to 10 and suggestions for improvement.

Format your response as:
CRITERION SCORES:
[criterion name]: [score]/10 - [explanation]

OVERALL SCORE: [score]/10

FEEDBACK:
[detailed feedback and suggestions for improvement]"#;

    pub fn new<I, S>(generator: G, test_cases: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String> {
        Self {
            generator,
            test_cases: test_cases.into_iter().map(Into::into).collect(),
            criteria: DEFAULT_CRITERIA.into_iter().map(String::from).collect(),
            template: PromptTemplate::new(Self::EVALUATION_TEMPLATE_STR),
            run_params: GenerationParameters::new(0.3, 800),
            assess_params: GenerationParameters::new(0.2, 600)
                .with_system_prompt("You are an expert evaluator of AI prompts and responses. Provide objective, constructive feedback."),
        }
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String> {
        self.criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    fn prompt_for_case(prompt: &str, test_case: &str) -> String {
        if prompt.contains("{{input}}") {
            prompt.replace("{{input}}", test_case)
        } else {
            format!("{}\n\nInput: {}", prompt, test_case)
        }
    }

    async fn evaluate_case(&self, prompt: &str, test_case: &str, task_description: &str, criteria: &str) -> Result<Evaluation, GenerationError> {
        let response = self
            .generator
            .complete(&Self::prompt_for_case(prompt, test_case), &self.run_params)
            .await?;
        let evaluation_prompt = render(&self.template, &[
            ("task", task_description),
            ("prompt", prompt),
            ("input", test_case),
            ("response", response.as_str()),
            ("criteria", criteria),
        ])?;
        assess(&self.generator, &evaluation_prompt, &self.assess_params, self.range()).await
    }
}

/// Mean of the overall scores and of each criterion over the cases that report it. The feedback is the worst case's.
fn average(evaluations: &[(String, Evaluation)]) -> Evaluation {
    let count = evaluations.len() as f64;
    let score = evaluations.iter().map(|(_, evaluation)| evaluation.score).sum::<f64>() / count;

    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for (_, evaluation) in evaluations {
        for (criterion, criterion_score) in &evaluation.criteria_scores {
            let entry = sums.entry(criterion.clone()).or_insert((0.0, 0));
            entry.0 += criterion_score;
            entry.1 += 1;
        }
    }
    let criteria_scores = sums
        .into_iter()
        .map(|(criterion, (sum, n))| (criterion, sum / n as f64))
        .collect();

    let feedback = evaluations
        .iter()
        .min_by(|a, b| a.1.score.total_cmp(&b.1.score))
        .and_then(|(test_case, worst)| worst
            .feedback
            .as_ref()
            .map(|feedback| format!("On test input \"{}\" ({}): {}", test_case, worst.score, feedback)));

    Evaluation {
        score,
        criteria_scores,
        feedback,
    }
}

#[async_trait]
impl<G: TextGeneration> QualityScorer for TestCaseScorer<G> {
    fn range(&self) -> ScoreRange {
        ScoreRange::one_to_ten()
    }

    async fn score(&self, content: &str, task_description: &str) -> Result<f64, GenerationError> {
        self.evaluate(content, task_description).await.map(|evaluation| evaluation.score)
    }

    async fn evaluate(&self, content: &str, task_description: &str) -> Result<Evaluation, GenerationError> {
        if self.test_cases.is_empty() {
            return Err(GenerationError::Other("no test cases to run the prompt on".to_string()));
        }
        let criteria = criteria_list(&self.criteria);
        let mut evaluations = Vec::with_capacity(self.test_cases.len());
        for test_case in &self.test_cases {
            let evaluation = self.evaluate_case(content, test_case, task_description, &criteria).await?;
            debug!("Test case {:?} scored {}", test_case, evaluation.score);
            evaluations.push((test_case.clone(), evaluation));
        }
        Ok(average(&evaluations))
    }
}

/// Scores by the share of keywords the content mentions, case-insensitively and as whole words. Deterministic.
#[derive(Debug, Clone)]
pub struct KeywordCoverageScorer {
    keywords: Vec<Regex>,
    range: ScoreRange,
}

impl KeywordCoverageScorer {
    /// Blank keywords are ignored.
    pub fn new<I, S>(keywords: I, range: ScoreRange) -> Result<Self, regex::Error>
        where I: IntoIterator<Item = S>,
              S: Into<String> {
        let keywords = keywords
            .into_iter()
            .map(Into::into)
            .filter(|keyword: &String| !keyword.trim().is_empty())
            .map(|keyword| Regex::new(&format!(r"(?i)(?:^|\W){}(?:\W|$)", regex::escape(keyword.trim()))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { keywords, range })
    }

    pub fn coverage(&self, content: &str) -> f64 {
        if self.keywords.is_empty() {
            return 1.0;
        }
        let hits = self.keywords.iter().filter(|keyword| keyword.is_match(content)).count();
        hits as f64 / self.keywords.len() as f64
    }
}

#[async_trait]
impl QualityScorer for KeywordCoverageScorer {
    fn range(&self) -> ScoreRange {
        self.range
    }

    async fn score(&self, content: &str, _task_description: &str) -> Result<f64, GenerationError> {
        Ok(self.range.min + self.coverage(content) * self.range.width())
    }
}
