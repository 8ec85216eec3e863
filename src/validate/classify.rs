//! Classifying lint/build command results.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sandbox::CommandOutput;

/// Shell exit code for "command not found".
pub const EXIT_NOT_FOUND: i32 = 127;

/// Output kept per failed check.
const MAX_CHECK_OUTPUT_CHARS: usize = 6_000;

static ERROR_SIGNATURE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)(\berror\b|failed to compile|module not found|cannot find module|syntaxerror|typeerror|\bTS\d{4}\b|✖ \d+ problems?|npm ERR!|ELIFECYCLE|build failed)",
    )
    .unwrap()
});

/// What a non-zero exit without a recognizable error signature means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Treat it as a pass (warnings-only output, flaky tooling).
    #[default]
    Permissive,
    /// Treat it as a failure.
    Conservative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    /// The tool is not installed in the sandbox.
    Skipped,
    Failed(String),
}

pub fn has_error_signature(text: &str) -> bool {
    ERROR_SIGNATURE_REGEX.is_match(text)
}

pub fn classify(output: &CommandOutput, policy: FailurePolicy) -> CheckStatus {
    match output.exit_code {
        0 => CheckStatus::Passed,
        EXIT_NOT_FOUND => CheckStatus::Skipped,
        _ => {
            let combined = output.combined();
            let failed = has_error_signature(&combined) || policy == FailurePolicy::Conservative;
            if failed {
                CheckStatus::Failed(head(&combined, MAX_CHECK_OUTPUT_CHARS))
            } else {
                tracing::debug!(exit_code = output.exit_code, "non-zero exit without error signature, passing");
                CheckStatus::Passed
            }
        }
    }
}

fn head(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n... (output truncated)", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::output;

    #[test]
    fn exit_codes() {
        let policy = FailurePolicy::Permissive;
        assert_eq!(classify(&output(0, "Error: ignored", ""), policy), CheckStatus::Passed);
        assert_eq!(classify(&output(127, "", "sh: eslint: not found"), policy), CheckStatus::Skipped);
    }

    #[test]
    fn signature_means_failure() {
        let out = output(1, "", "./app/page.tsx\nType error: Property 'x' does not exist");
        match classify(&out, FailurePolicy::Permissive) {
            CheckStatus::Failed(text) => assert!(text.contains("Type error")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(has_error_signature("src/App.tsx(3,1): error TS2304: Cannot find name"));
        assert!(has_error_signature("✖ 3 problems (3 errors, 0 warnings)"));
        assert!(has_error_signature("Failed to compile."));
    }

    #[test]
    fn unrecognized_failure_follows_policy() {
        let out = output(2, "warning: unused variable", "");
        assert_eq!(classify(&out, FailurePolicy::Permissive), CheckStatus::Passed);
        assert!(matches!(
            classify(&out, FailurePolicy::Conservative),
            CheckStatus::Failed(_)
        ));
    }

    #[test]
    fn long_output_is_truncated() {
        let out = output(1, &"error ".repeat(5_000), "");
        let CheckStatus::Failed(text) = classify(&out, FailurePolicy::Permissive) else {
            panic!("expected failure");
        };
        assert!(text.ends_with("(output truncated)"));
        assert!(text.len() < 7_000);
    }

    #[test]
    fn policy_parses_from_config() {
        let policy: FailurePolicy = serde_json::from_str("\"conservative\"").unwrap();
        assert_eq!(policy, FailurePolicy::Conservative);
    }
}
