//! Refining a prompt by how well it performs on a handful of test inputs.
//!
//! ```text
//! OPENAI_API_KEY=sk-... cargo run --example meta_prompting
//! ```
//! The artifact being refined is itself a prompt. Every candidate is run on each test input, the replies are scored
//! against the criteria, and the averaged score plus the feedback of the weakest input steer the next critique.

use std::env;

use anyhow::{bail, Result};
use recurprompt::refine::{
    CancellationFlag, GenerationParameters, IterativeRefinementLoop, RefinementPrompts, RunConfiguration, Stage, StagePrompt,
};
use recurprompt::utils::llm::openai::OpenAIGenerator;
use recurprompt::utils::printing::TracePrinter;
use recurprompt::utils::scorers::TestCaseScorer;

const TASK: &str = "Generate creative product names for a new line of eco-friendly kitchen appliances";
const TEST_CASES: [&str; 3] = [
    "A blender made from recycled materials",
    "An energy-efficient coffee maker with solar charging",
    "A compost bin with built-in sensors",
];
const CRITERIA: [&str; 4] = [
    "Creativity and uniqueness",
    "Relevance to eco-friendly theme",
    "Market appeal and memorability",
    "Brand consistency",
];

const PROMPT_WRITER_TEMPLATE_STR: &str = r#"You are an expert prompt engineer. Write one high-quality prompt for this task:

Task: {{task}}
{{requirements}}
The prompt should be clear and specific, include relevant context and constraints, and use effective prompting techniques. A product description will be appended to it as `Input: ...`.

Reply with the prompt text only."#;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    if env::var("OPENAI_API_KEY").is_err() {
        bail!("OPENAI_API_KEY environment variable not set");
    }
    let model = env::var("RSIP_MODEL").unwrap_or_else(|_| "gpt-4".to_string());

    let prompts = RefinementPrompts::default().with_stage(
        Stage::Initial,
        StagePrompt::new(
            Stage::Initial,
            PROMPT_WRITER_TEMPLATE_STR,
            GenerationParameters::new(0.8, 1500).with_system_prompt("You are a world-class prompt engineer."),
        ),
    );
    let config = RunConfiguration::new(TASK)
        .with_requirements("Each prompt should yield 3 to 5 name ideas with a one-line rationale each.")
        .with_max_iterations(2)
        .with_quality_threshold(8.5);

    let cancel = CancellationFlag::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || handle.cancel())?;

    let generator = OpenAIGenerator::new(model.as_str());
    let scorer = TestCaseScorer::new(OpenAIGenerator::new(model.as_str()), TEST_CASES).with_criteria(CRITERIA);
    let result = IterativeRefinementLoop::new(prompts)
        .run(&config, &generator, &scorer, Some(&cancel))
        .await?;

    let printer = TracePrinter::default();
    printer.print(&result);
    printer.print_markdown(&format!("\n# Best prompt\n\n```\n{}\n```\n", result.best_artifact()));
    if let Some(feedback) = &result.best().evaluator_feedback {
        printer.print_markdown(&format!("\n# Remaining feedback\n\n{}\n", feedback));
    }
    Ok(())
}
