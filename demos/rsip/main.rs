//! Recursive self-improvement of a piece of writing against the OpenAI API.
//!
//! ```text
//! OPENAI_API_KEY=sk-... cargo run --example rsip -- business
//! OPENAI_API_KEY=sk-... cargo run --example rsip -- "Explain how vaccines work" "Under 300 words, for teenagers"
//! ```
//! The first argument is a preset (`creative`, `business`, `technical`) or a task of your own, optionally followed by
//! its requirements. Ctrl-C stops the run after the pass in flight.

use std::env;

use anyhow::{bail, Result};
use recurprompt::refine::{CancellationFlag, IterativeRefinementLoop, RunConfiguration};
use recurprompt::utils::llm::openai::OpenAIGenerator;
use recurprompt::utils::printing::TracePrinter;
use recurprompt::utils::scorers::SelfAssessmentScorer;

struct Preset {
    name: &'static str,
    task: &'static str,
    requirements: &'static str,
    max_iterations: usize,
    quality_threshold: f64,
}

const PRESETS: [Preset; 3] = [
    Preset {
        name: "creative",
        task: "Write a compelling short story about a time traveler who accidentally changes a small detail in the \
        past and discovers how it creates unexpected ripple effects in the present.",
        requirements: "The story should be engaging, have well-developed characters, include dialogue, and be \
        approximately 300-400 words long.",
        max_iterations: 3,
        quality_threshold: 8.5,
    },
    Preset {
        name: "business",
        task: "Create a compelling business proposal for a mobile app that helps people reduce food waste by \
        connecting them with local restaurants and grocery stores offering discounted surplus food.",
        requirements: "Include market opportunity, solution description, revenue model, competitive analysis, and \
        implementation timeline. Make it persuasive for potential investors.",
        max_iterations: 2,
        quality_threshold: 8.0,
    },
    Preset {
        name: "technical",
        task: "Explain how blockchain technology works to someone with no technical background, covering key \
        concepts like decentralization, consensus mechanisms, and cryptographic hashing.",
        requirements: "Use simple language, practical analogies, avoid jargon, and include real-world examples. \
        Should be comprehensive yet accessible.",
        max_iterations: 3,
        quality_threshold: 8.5,
    },
];

fn configuration_from_args(mut args: impl Iterator<Item = String>) -> RunConfiguration {
    let first = args.next().unwrap_or_else(|| PRESETS[0].name.to_string());
    let config = match PRESETS.iter().find(|preset| preset.name == first) {
        Some(preset) => RunConfiguration::new(preset.task)
            .with_requirements(preset.requirements)
            .with_max_iterations(preset.max_iterations)
            .with_quality_threshold(preset.quality_threshold),
        None => RunConfiguration::new(first)
            .with_requirements(args.next().unwrap_or_default())
            .with_max_iterations(3)
            .with_quality_threshold(8.0),
    };
    config
        .with_min_improvement_delta(0.25)
        .with_improvement_analysis(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    if env::var("OPENAI_API_KEY").is_err() {
        bail!("OPENAI_API_KEY environment variable not set");
    }

    let config = configuration_from_args(env::args().skip(1));
    let model = env::var("RSIP_MODEL").unwrap_or_else(|_| "gpt-4".to_string());

    let cancel = CancellationFlag::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("Stopping after the current pass...");
        handle.cancel();
    })?;

    let generator = OpenAIGenerator::new(model.as_str());
    let scorer = SelfAssessmentScorer::new(OpenAIGenerator::new(model.as_str()));
    let result = IterativeRefinementLoop::default()
        .run(&config, &generator, &scorer, Some(&cancel))
        .await?;

    let printer = TracePrinter::default();
    printer.print(&result);
    printer.print_markdown(&format!("\n# Best version\n\n{}\n", result.best_artifact()));
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
