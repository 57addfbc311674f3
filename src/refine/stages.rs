//! Prompts of the five stages of a refinement run.
//!
//! Every stage is a [PromptTemplate] plus the [GenerationParameters] it is sent with. Templates may use any subset of
//! the placeholders [PassContext] knows: `{{task}}`, `{{requirements}}`, `{{content}}`, `{{critique}}`, `{{plan}}`,
//! `{{iteration}}`, `{{feedback}}`, `{{original}}` and `{{improved}}`.

use std::fmt;

use anyhow::Result;

use crate::filler::{Fill, FillPlaceholders};
use crate::prompt::{PartialPrompt, PromptTemplate};
use crate::refine::capability::GenerationParameters;
use crate::refine::errors::InvalidConfiguration;
use crate::utils::JsonMap;

/// Characters of each version shown to the improvement analysis.
const ANALYSIS_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Initial,
    Critique,
    Plan,
    Apply,
    Analysis,
}

impl Stage {
    pub const ALL: [Stage; 5] = [Stage::Initial, Stage::Critique, Stage::Plan, Stage::Apply, Stage::Analysis];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Initial => "initial",
            Stage::Critique => "critique",
            Stage::Plan => "plan",
            Stage::Apply => "apply",
            Stage::Analysis => "analysis",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stage template together with its sampling parameters.
#[derive(Debug, Clone)]
pub struct StagePrompt {
    pub template: PromptTemplate,
    pub params: GenerationParameters,
}

impl StagePrompt {
    pub fn new(stage: Stage, template: impl Into<String>, params: GenerationParameters) -> Self {
        let mut meta = JsonMap::new();
        meta.insert("stage".to_string(), stage.name().into());
        Self {
            template: PromptTemplate::with_metadata(template, meta),
            params,
        }
    }

    /// Fill the template from the context and complete it.
    pub fn render(&self, context: &PassContext<'_>) -> Result<String> {
        let mut prompt = self.template.construct_prompt();
        context.fill(&mut prompt)?;
        Ok(prompt.complete()?)
    }
}

/// The stage prompts a refinement loop is built with.
#[derive(Debug, Clone)]
pub struct RefinementPrompts {
    initial: StagePrompt,
    critique: StagePrompt,
    plan: StagePrompt,
    apply: StagePrompt,
    analysis: StagePrompt,
}

impl RefinementPrompts {
    const INITIAL_TEMPLATE_STR: &'static str = r#"Task: {{task}}
{{requirements}}
Create high-quality content that addresses this task thoroughly. Make it well-structured, comprehensive and valuable."#;

    const CRITIQUE_TEMPLATE_STR: &'static str = r#"Act as a critical reviewer of your own work and analyze the content below objectively.

ORIGINAL TASK: {{task}}

CONTENT TO REVIEW (iteration {{iteration}}):
{{content}}
{{feedback}}
Cover:
1. STRENGTHS: what is done well
2. WEAKNESSES: what specifically needs improvement
3. MISSING ELEMENTS: what is absent or underrepresented
4. STRUCTURAL ISSUES: problems with organization or flow
5. IMPROVEMENT OPPORTUNITIES: concrete suggestions
Be honest, constructive and detailed."#;

    const PLAN_TEMPLATE_STR: &'static str = r#"Turn the critique below into a specific, actionable improvement plan.

ORIGINAL TASK: {{task}}
CURRENT CONTENT: {{content}}
SELF-CRITIQUE: {{critique}}

List the 3 to 5 most important changes first. For each, say exactly what to do, including any restructuring and any new material to add."#;

    const APPLY_TEMPLATE_STR: &'static str = r#"Implement the improvement plan and produce an enhanced version of the content.

ORIGINAL TASK: {{task}}
CURRENT CONTENT: {{content}}
CRITIQUE RECEIVED: {{critique}}
IMPROVEMENT PLAN: {{plan}}

Fix every weakness the critique names, keep what already works, and reply with the complete improved version only."#;

    const ANALYSIS_TEMPLATE_STR: &'static str = r#"Compare the two versions below and list the specific improvements that were made.

ORIGINAL VERSION:
{{original}}

IMPROVED VERSION:
{{improved}}

Reply with a simple bullet list, one improvement per line."#;

    pub fn new(initial: StagePrompt, critique: StagePrompt, plan: StagePrompt, apply: StagePrompt, analysis: StagePrompt) -> Self {
        Self {
            initial,
            critique,
            plan,
            apply,
            analysis,
        }
    }

    pub fn stage(&self, stage: Stage) -> &StagePrompt {
        match stage {
            Stage::Initial => &self.initial,
            Stage::Critique => &self.critique,
            Stage::Plan => &self.plan,
            Stage::Apply => &self.apply,
            Stage::Analysis => &self.analysis,
        }
    }

    /// Replace the prompt of one stage.
    pub fn with_stage(mut self, stage: Stage, prompt: StagePrompt) -> Self {
        match stage {
            Stage::Initial => self.initial = prompt,
            Stage::Critique => self.critique = prompt,
            Stage::Plan => self.plan = prompt,
            Stage::Apply => self.apply = prompt,
            Stage::Analysis => self.analysis = prompt,
        }
        self
    }

    /// Rejects templates that use placeholders [PassContext] cannot fill.
    pub fn validate(&self) -> Result<(), InvalidConfiguration> {
        for stage in Stage::ALL {
            let mut unknown: Vec<&String> = self
                .stage(stage)
                .template
                .placeholders
                .iter()
                .filter(|p| !PassContext::PLACEHOLDERS.contains(&p.as_str()))
                .collect();
            unknown.sort_unstable();
            if let Some(placeholder) = unknown.first() {
                return Err(InvalidConfiguration::UnknownPlaceholder {
                    stage: stage.name().to_string(),
                    placeholder: placeholder.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for RefinementPrompts {
    fn default() -> Self {
        Self::new(
            StagePrompt::new(
                Stage::Initial,
                Self::INITIAL_TEMPLATE_STR,
                GenerationParameters::new(0.7, 1200)
                    .with_system_prompt("You are a skilled content creator who produces high-quality, thoughtful work."),
            ),
            StagePrompt::new(
                Stage::Critique,
                Self::CRITIQUE_TEMPLATE_STR,
                GenerationParameters::new(0.3, 800)
                    .with_system_prompt("You are a meticulous critic who gives honest, detailed feedback."),
            ),
            StagePrompt::new(
                Stage::Plan,
                Self::PLAN_TEMPLATE_STR,
                GenerationParameters::new(0.4, 600)
                    .with_system_prompt("You are an improvement strategist who writes detailed, actionable plans."),
            ),
            StagePrompt::new(
                Stage::Apply,
                Self::APPLY_TEMPLATE_STR,
                GenerationParameters::new(0.6, 1500)
                    .with_system_prompt("You are a skilled editor who turns feedback into a superior version of the content."),
            ),
            StagePrompt::new(
                Stage::Analysis,
                Self::ANALYSIS_TEMPLATE_STR,
                GenerationParameters::new(0.3, 400)
                    .with_system_prompt("You are an analytical reviewer who spots the changes between versions."),
            ),
        )
    }
}

/// Values a refinement pass knows about, filled into whichever placeholders a template uses.
#[derive(Debug, Clone, Default)]
pub struct PassContext<'a> {
    pub task: &'a str,
    /// Rendered as `Requirements: ...`, or as nothing when empty
    pub requirements: &'a str,
    pub content: &'a str,
    pub critique: &'a str,
    pub plan: &'a str,
    /// Evaluator notes on `content`, rendered under a heading or as nothing when empty
    pub feedback: &'a str,
    pub iteration: usize,
    pub improved: &'a str,
}

impl<'a> PassContext<'a> {
    pub const PLACEHOLDERS: [&'static str; 9] =
        ["task", "requirements", "content", "critique", "plan", "feedback", "iteration", "original", "improved"];

    fn value_of(&self, placeholder: &str) -> Option<String> {
        let value = match placeholder {
            "task" => self.task.to_string(),
            "requirements" if self.requirements.is_empty() => String::new(),
            "requirements" => format!("Requirements: {}", self.requirements),
            "content" => self.content.to_string(),
            "critique" => self.critique.to_string(),
            "plan" => self.plan.to_string(),
            "feedback" if self.feedback.is_empty() => String::new(),
            "feedback" => format!("\nEVALUATOR FEEDBACK:\n{}\n", self.feedback),
            "iteration" => self.iteration.to_string(),
            "original" => preview(self.content, ANALYSIS_PREVIEW_CHARS),
            "improved" => preview(self.improved, ANALYSIS_PREVIEW_CHARS),
            _ => return None,
        };
        Some(value)
    }
}

impl FillPlaceholders for PassContext<'_> {
    fn placeholders_to_fill(&self) -> &[&'static str] {
        &Self::PLACEHOLDERS
    }
}

impl Fill for PassContext<'_> {
    fn fill(&self, partial_prompt: &mut PartialPrompt) -> Result<()> {
        for placeholder in self.placeholders_to_fill() {
            if partial_prompt.has_placeholder(placeholder) {
                if let Some(value) = self.value_of(placeholder) {
                    partial_prompt.try_fill(*placeholder, value)?;
                }
            }
        }
        Ok(())
    }
}

/// The first `max_chars` characters, with `...` appended when something was cut.
fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
