//! Model tier selection.
//!
//! A fixed-order cascade over the prompt text. Later stages overwrite the
//! choice of earlier ones, so complexity signals always win last:
//!
//! 1. default `Balanced`
//! 2. Angular with complexity (or a long prompt) returns `Balanced` at once
//! 3. coding-focus keywords on a short prompt pick `CodeFocused`
//! 4. speed keywords without complexity pick `Fast`
//! 5. complexity keywords or a very long prompt pick `Complex`

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Framework, TierRequest};
use crate::tiers::GenerationModelTier;

const COMPLEXITY_KEYWORDS: &[&str] = &[
    "advanced",
    "complex",
    "sophisticated",
    "enterprise",
    "architecture",
    "performance",
    "optimization",
    "scalability",
    "authentication",
    "authorization",
    "database",
    "api",
    "integration",
    "deployment",
    "security",
    "testing",
];

const CODING_KEYWORDS: &[&str] = &["refactor", "optimize", "debug", "fix bug", "improve code"];

// "simple" alone is not a speed signal.
const SPEED_KEYWORDS: &[&str] = &["quick", "fast", "basic", "prototype"];

/// Prompts longer than this always go to the `Complex` tier.
pub const LONG_PROMPT_CHARS: usize = 1000;

/// Angular prompts longer than this are pinned to `Balanced`.
pub const ANGULAR_PIN_CHARS: usize = 500;

/// Keywords match at a word start, so "quickly" hits `quick` but "rapid"
/// does not hit `api`.
fn keyword_regex(keywords: &[&str]) -> Regex {
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})", alternation)).expect("keyword regex is valid")
}

static COMPLEXITY_REGEX: LazyLock<Regex> = LazyLock::new(|| keyword_regex(COMPLEXITY_KEYWORDS));
static CODING_REGEX: LazyLock<Regex> = LazyLock::new(|| keyword_regex(CODING_KEYWORDS));
static SPEED_REGEX: LazyLock<Regex> = LazyLock::new(|| keyword_regex(SPEED_KEYWORDS));

/// Pick a tier for the prompt. Pure, no I/O.
pub fn select_model(prompt: &str, framework: Option<Framework>) -> GenerationModelTier {
    let len = prompt.chars().count();
    let complex = COMPLEXITY_REGEX.is_match(prompt);

    let mut tier = GenerationModelTier::Balanced;

    if framework == Some(Framework::Angular) && (complex || len > ANGULAR_PIN_CHARS) {
        return GenerationModelTier::Balanced;
    }

    if CODING_REGEX.is_match(prompt) && len <= LONG_PROMPT_CHARS {
        tier = GenerationModelTier::CodeFocused;
    }

    if SPEED_REGEX.is_match(prompt) && !complex {
        tier = GenerationModelTier::Fast;
    }

    if complex || len > LONG_PROMPT_CHARS {
        tier = GenerationModelTier::Complex;
    }

    tier
}

/// Resolve the caller's tier request: a pinned tier skips selection.
pub fn resolve_tier(
    request: TierRequest,
    prompt: &str,
    framework: Option<Framework>,
) -> GenerationModelTier {
    match request {
        TierRequest::Explicit(tier) => tier,
        TierRequest::Auto => select_model(prompt, framework),
    }
}
