use termimad::{FmtText, MadSkin};

use crate::refine::{IterationRecord, RunResult};

const IMPROVEMENTS_PREVIEW_CHARS: usize = 50;

/// Render the trace of a run as a markdown table followed by a summary.
pub fn render_trace_markdown(result: &RunResult) -> String {
    let mut markdown = String::from("|:-:|:-:|:-|\n|**Iteration**|**Quality Score**|**Key Improvements**|\n|-:|:-:|-\n");
    for record in result.iterations.iter() {
        let marker = if record.index == result.best_iteration_index { " *best*" } else { "" };
        markdown.push_str(&format!("|{}{}|{:.2}|{}|\n", record.index, marker, record.quality_score, improvements_preview(record)));
    }
    markdown.push_str("|-\n\n");
    markdown.push_str(&format!("**Stop reason:** {}\n\n", result.stop_reason.as_str()));
    markdown.push_str(&format!("**Quality improvement:** {:+.2}\n\n", result.quality_improvement()));
    markdown.push_str(&format!("**Converged:** {}\n", if result.converged() { "yes" } else { "no" }));
    if let Some(failure) = &result.failure {
        markdown.push_str(&format!("\n**Failure:** {}\n", failure));
    }
    markdown
}

fn improvements_preview(record: &IterationRecord) -> String {
    if record.index == 0 {
        return "initial draft".to_string();
    }
    let improvements = &record.improvements_made;
    let mut preview = improvements.iter().take(2).map(String::as_str).collect::<Vec<_>>().join(", ");
    if improvements.len() > 2 {
        preview.push_str(&format!(" (+{} more)", improvements.len() - 2));
    }
    let preview = preview.replace('|', "/");
    match preview.char_indices().nth(IMPROVEMENTS_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &preview[..cut]),
        None => preview,
    }
}

/// Prints run traces to the terminal with a [MadSkin].
pub struct TracePrinter {
    pub skin: MadSkin,
    pub wrap_width: Option<usize>,
}

impl Default for TracePrinter {
    fn default() -> Self {
        Self {
            skin: MadSkin::default(),
            wrap_width: None,
        }
    }
}

impl TracePrinter {
    pub fn render(&self, result: &RunResult) -> String {
        let markdown = render_trace_markdown(result);
        FmtText::from(&self.skin, &markdown, self.wrap_width).to_string()
    }

    pub fn print(&self, result: &RunResult) {
        print!("{}", self.render(result));
    }

    /// Print any markdown, such as the best artifact of a run.
    pub fn print_markdown(&self, markdown: &str) {
        print!("{}", FmtText::from(&self.skin, markdown, self.wrap_width));
    }
}
