//! Production [TextGeneration](crate::refine::TextGeneration) adapters.

pub mod openai;
