//! Extraction of scores, evaluations and bullet lists from free-text replies.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;

use crate::refine::{Evaluation, ScoreRange};
use crate::utils::postprocess::json::{filter_to_json, number_field};

lazy_static! {
    static ref OVERALL_SCORE_RE: Regex = Regex::new(r"(?i)overall\s+score\W*?(\d+(?:\.\d+)?)").unwrap();
    static ref NUMBER_RE: Regex = Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap();
    static ref LIST_MARKER_RE: Regex = Regex::new(r"^\s*\d+[.)]\s*").unwrap();
    /// `7/10`, `7.5 out of 10`
    static ref RATED_RE: Regex = Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:/|out\s+of)\s*\d+(?:\.\d+)?").unwrap();
    /// `1-10`, `1 to 10`
    static ref SCALE_RE: Regex = Regex::new(r"(?i)\d+(?:\.\d+)?\s*(?:-|to)\s*\d+(?:\.\d+)?").unwrap();
    static ref CRITERION_SECTION_RE: Regex = Regex::new(r"(?is)criterion\s+scores\W*?\n(.*?)(?:overall\s+score|feedback:|\z)").unwrap();
    static ref CRITERION_LINE_RE: Regex = Regex::new(r"^\s*(?:[-*•]\s*)?([^:]+?)\s*:\W*?(\d+(?:\.\d+)?)\s*/\s*\d+").unwrap();
    static ref FEEDBACK_RE: Regex = Regex::new(r"(?i)feedback\s*:").unwrap();
}

const JSON_SCORE_KEYS: [&str; 3] = ["score", "overall_score", "quality_score"];

/// Extracts a quality score that lies within `range` from a reply.
///
/// Tried in order: a json object with a `score`-like field, an `OVERALL SCORE: n` line, and finally a line that
/// mentions "quality". On such a line a leading list number and scale phrases like `1-10` are ignored, and a rating
/// like `n/10` or `n out of 10` wins over a bare number.
///
/// # Example
/// ```
/// use recurprompt::refine::ScoreRange;
/// use recurprompt::utils::postprocess::score::extract_quality_score;
/// let reply = "CRITERION SCORES:\nclarity: 6/10 - fine\n\nOVERALL SCORE: 7/10";
/// assert_eq!(extract_quality_score(reply, ScoreRange::one_to_ten()), Some(7.0));
/// assert_eq!(extract_quality_score("5. Quality: I rate this 8 out of 10", ScoreRange::one_to_ten()), Some(8.0));
/// assert_eq!(extract_quality_score("no numbers here", ScoreRange::one_to_ten()), None);
/// ```
pub fn extract_quality_score(reply: &str, range: ScoreRange) -> Option<f64> {
    let in_range = |score: f64| range.contains(score).then_some(score);

    if let Ok(value) = filter_to_json(reply) {
        let from_json = JSON_SCORE_KEYS
            .iter()
            .find_map(|key| number_field(&value, key))
            .and_then(in_range);
        if from_json.is_some() {
            return from_json;
        }
    }

    let overall = OVERALL_SCORE_RE
        .captures_iter(reply)
        .filter_map(|captures| captures[1].parse::<f64>().ok())
        .find_map(in_range);
    if overall.is_some() {
        return overall;
    }

    let from_quality_line = reply
        .lines()
        .filter(|line| line.to_lowercase().contains("quality"))
        .find_map(|line| score_on_quality_line(line, range));
    if let Some(score) = from_quality_line {
        warn!("No overall score in the reply, took {} from a line mentioning quality", score);
    }
    from_quality_line
}

fn score_on_quality_line(line: &str, range: ScoreRange) -> Option<f64> {
    let line = LIST_MARKER_RE.replace(line, "");
    let rated = RATED_RE
        .captures_iter(&line)
        .filter_map(|captures| captures[1].parse::<f64>().ok())
        .find(|score| range.contains(*score));
    if rated.is_some() {
        return rated;
    }
    let without_scales = SCALE_RE.replace_all(&line, " ");
    let without_ratings = RATED_RE.replace_all(&without_scales, " ");
    NUMBER_RE
        .find_iter(&without_ratings)
        .filter_map(|number| number.as_str().parse::<f64>().ok())
        .find(|score| range.contains(*score))
}

/// Scores of the `CRITERION SCORES:` section, keyed by criterion name. Lines look like `clarity: 7/10 - reason`.
/// Scores outside `range` are dropped.
pub fn extract_criterion_scores(reply: &str, range: ScoreRange) -> BTreeMap<String, f64> {
    let Some(section) = CRITERION_SECTION_RE.captures(reply) else {
        return BTreeMap::new();
    };
    section[1]
        .lines()
        .filter_map(|line| CRITERION_LINE_RE.captures(line))
        .filter_map(|captures| {
            let name = captures[1].trim_matches(|c: char| c == '*' || c == '[' || c == ']' || c.is_whitespace());
            let score = captures[2].parse::<f64>().ok()?;
            (!name.is_empty() && range.contains(score)).then(|| (name.to_string(), score))
        })
        .collect()
}

/// Everything after the first `FEEDBACK:` marker, trimmed. None when there is no marker or nothing follows it.
pub fn extract_feedback(reply: &str) -> Option<String> {
    let marker = FEEDBACK_RE.find(reply)?;
    let feedback = reply[marker.end()..].trim();
    (!feedback.is_empty()).then(|| feedback.to_string())
}

/// A full [Evaluation] of a rubric-style reply. None when no score can be found.
pub fn extract_evaluation(reply: &str, range: ScoreRange) -> Option<Evaluation> {
    let score = extract_quality_score(reply, range)?;
    Some(Evaluation {
        score,
        criteria_scores: extract_criterion_scores(reply, range),
        feedback: extract_feedback(reply),
    })
}

/// Collects up to `limit` items of a bullet or numbered list, with the markers stripped.
pub fn extract_bullet_items(reply: &str, limit: usize) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| is_list_item(line))
        .map(|line| line.trim_start_matches(|c: char| "-•*0123456789. ".contains(c)).trim())
        .filter(|item| !item.is_empty())
        .take(limit)
        .map(String::from)
        .collect()
}

fn is_list_item(line: &str) -> bool {
    if line.starts_with(['-', '•', '*']) {
        return true;
    }
    let mut chars = line.chars();
    matches!((chars.next(), chars.next()), (Some('1'..='9'), Some('.')))
}
