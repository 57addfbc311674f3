//! # Filler
//! Anything that fills one or more placeholders of a [PartialPrompt].
//!
//! A filler declares the placeholders it knows about and fills those the template actually uses, so one filler can
//! serve templates that only use a subset of them.

use crate::prompt::PartialPrompt;
use anyhow::Result;

pub trait FillPlaceholders {
    fn placeholders_to_fill(&self) -> &[&'static str];
}

pub trait Fill: FillPlaceholders {
    fn fill(&self, partial_prompt: &mut PartialPrompt) -> Result<()>;
}
