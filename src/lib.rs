//! # recurprompt
//!
//! Prompt-centric recursive self-improvement for LLM applications in Rust
//!
//! ## What it does
//!
//! Ask a model for an artifact (a story, a proposal, an explanation), then let it critique its own work, plan the
//! improvements, apply them and score the result. Repeat until the score is good enough, the gains flatten out, or
//! the pass budget is spent, and keep the whole trace.
//!
//! ```text
//! task ─► initial ─► score ─┬─► critique ─► plan ─► apply ─► score ─┐
//!                           └────────────── next pass ◄─────────────┘
//! ```
//!
//! ## Concepts and Design
//!
//! Like the rest of the prompt-centric family, everything is explicit data: prompts are templates, a run is a value
//! you pass in, and the result is a value you get back. Cycle speed is NOT a priority since the model takes orders of
//! magnitude longer than anything the loop does.
//!
//! ### Prompt Template and Placeholder
//!
//! A template looks like
//!
//! ```text
//! Review this draft of {{task}}:
//! {{content}}
//! ```
//!
//! `{{task}}` and `{{content}}` are placeholders. See [prompt] for how a template becomes a complete prompt and
//! [filler] for the things that fill placeholders.
//!
//! ### Capabilities
//!
//! The loop is driven by two injected capabilities, [TextGeneration](refine::TextGeneration) and
//! [QualityScorer](refine::QualityScorer). Production adapters live in [utils]; tests inject deterministic fakes
//! through the same traits.
//!
//! ### The loop
//!
//! [IterativeRefinementLoop](refine::IterativeRefinementLoop) holds only the stage prompts. Everything else comes in
//! through [RunConfiguration](refine::RunConfiguration) and goes out as a [RunResult](refine::RunResult), whose
//! [StopReason](refine::StopReason) tells clean convergence apart from forced termination.
//!
//! ## Features
//! * `openai` (default): the `async-openai` adapter and `tiktoken` token counting
//! * `terminal_printing` (default): trace printing with `termimad`
//!
//! ## License
//!
//! `recurprompt` will always remain free under Apache license.

pub mod prompt;
pub mod filler;
pub mod refine;
pub mod utils;
