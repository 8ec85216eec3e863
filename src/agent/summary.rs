//! Task summary extraction and artifact title generation.

use std::sync::LazyLock;

use regex::Regex;

use super::prompts::TITLE_SYSTEM;
use crate::llm::{GenerateRequest, Message, ModelGateway};
use crate::tiers::TierSpec;

static TASK_SUMMARY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<task_summary>\s*(.*?)\s*</task_summary>").unwrap());

const AUTO_SUMMARY_MAX_PATHS: usize = 10;
const TITLE_MAX_WORDS: usize = 6;
const TITLE_MAX_CHARS: usize = 60;
const TITLE_MAX_TOKENS: u32 = 32;

pub const UNTITLED: &str = "Untitled Project";

/// The last non-empty `<task_summary>` block in `text`.
pub fn extract_task_summary(text: &str) -> Option<String> {
    TASK_SUMMARY_REGEX
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Summary built from written paths when the model never produced one.
pub fn auto_summary<'a>(paths: impl IntoIterator<Item = &'a str>) -> String {
    let paths: Vec<&str> = paths.into_iter().collect();
    if paths.is_empty() {
        return "No files were generated.".to_string();
    }
    let shown = paths
        .iter()
        .take(AUTO_SUMMARY_MAX_PATHS)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    let rest = paths.len().saturating_sub(AUTO_SUMMARY_MAX_PATHS);
    let noun = if paths.len() == 1 { "file" } else { "files" };
    if rest > 0 {
        format!("Generated {} {}: {} and {} more.", paths.len(), noun, shown, rest)
    } else {
        format!("Generated {} {}: {}.", paths.len(), noun, shown)
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].trim_end().to_string(),
        None => s.to_string(),
    }
}

/// Title derived from the first words of the prompt.
pub fn fallback_title(prompt: &str) -> String {
    let words: Vec<&str> = prompt
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .take(TITLE_MAX_WORDS)
        .collect();
    if words.is_empty() {
        return UNTITLED.to_string();
    }
    let joined = words.join(" ");
    let mut chars = joined.chars();
    let title = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => return UNTITLED.to_string(),
    };
    truncate_chars(&title, TITLE_MAX_CHARS)
}

fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .trim_start_matches(|c: char| c == '#' || c.is_whitespace())
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '*' || c == '.');
    let line = line.strip_prefix("Title:").unwrap_or(line).trim();
    if line.is_empty() {
        None
    } else {
        Some(truncate_chars(line, TITLE_MAX_CHARS))
    }
}

/// Ask the fast tier for a short artifact title, falling back to one
/// derived from the prompt.
pub async fn generate_title(
    gateway: &dyn ModelGateway,
    spec: &TierSpec,
    prompt: &str,
    summary: &str,
) -> String {
    let request = GenerateRequest {
        model: spec.model.clone(),
        max_tokens: TITLE_MAX_TOKENS,
        system: TITLE_SYSTEM.to_string(),
        messages: vec![Message::user(format!(
            "Request: {}\n\nWhat was built: {}",
            prompt, summary
        ))],
        tools: Vec::new(),
        tool_choice: None,
        temperature: spec.temperature,
    };
    match gateway.generate(&request).await {
        Ok(response) => clean_title(&response.text).unwrap_or_else(|| fallback_title(prompt)),
        Err(e) => {
            tracing::warn!(error = %e, "title generation failed, deriving from prompt");
            fallback_title(prompt)
        }
    }
}
