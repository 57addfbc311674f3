pub mod token;
#[cfg(feature = "openai")]
pub mod llm;
pub mod postprocess;
pub mod scorers;
#[cfg(feature = "terminal_printing")]
pub mod printing;
pub(crate) mod prompt_processing;

use serde_json::{Map, Value};

pub type JsonMap = Map<String, Value>;
