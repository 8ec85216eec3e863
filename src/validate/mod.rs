//! Lint/build validation and the bounded auto-fix cycle.
//!
//! Lint and build run concurrently inside the sandbox. When either fails,
//! the agent loop is re-entered with the failure output as a new user turn,
//! at most `max_fix_attempts` times.

pub mod classify;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentContext, AgentState, StopReason, prompts, run_agent};
use crate::errors::RunError;
use crate::events::ProgressEvent;
use crate::llm::Message;
use crate::models::Framework;
use crate::sandbox::Sandbox;

pub use classify::{CheckStatus, FailurePolicy, classify};

/// `[validation]` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_fix_attempts: u32,
    pub lint_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub unrecognized_failures: FailurePolicy,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_fix_attempts: 2,
            lint_timeout_secs: 30,
            build_timeout_secs: 120,
            unrecognized_failures: FailurePolicy::Permissive,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub lint_output: Option<String>,
    pub build_output: Option<String>,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.lint_output.is_none() && self.build_output.is_none()
    }

    /// Both failures combined into one block, if any.
    pub fn errors(&self) -> Option<String> {
        match (&self.lint_output, &self.build_output) {
            (None, None) => None,
            (Some(lint), None) => Some(format!("Lint errors:\n{}", lint)),
            (None, Some(build)) => Some(format!("Build errors:\n{}", build)),
            (Some(lint), Some(build)) => Some(format!(
                "Lint errors:\n{}\n\nBuild errors:\n{}",
                lint, build
            )),
        }
    }
}

async fn run_check(
    sandbox: &dyn Sandbox,
    label: &str,
    command: &str,
    timeout: Duration,
    policy: FailurePolicy,
) -> Option<String> {
    match sandbox.run_command(command, timeout).await {
        Ok(out) => match classify(&out, policy) {
            CheckStatus::Passed => None,
            CheckStatus::Skipped => {
                tracing::info!(check = label, command, "tool not installed, check skipped");
                None
            }
            CheckStatus::Failed(text) => Some(text),
        },
        // A check that cannot run does not block the run.
        Err(e) => {
            tracing::warn!(check = label, command, error = %e, "check could not run, skipped");
            None
        }
    }
}

/// Run lint and build concurrently.
pub async fn validate(
    sandbox: &dyn Sandbox,
    framework: Framework,
    config: &ValidationConfig,
) -> ValidationResult {
    let policy = config.unrecognized_failures;
    let (lint_output, build_output) = tokio::join!(
        run_check(
            sandbox,
            "lint",
            framework.lint_command(),
            Duration::from_secs(config.lint_timeout_secs),
            policy
        ),
        run_check(
            sandbox,
            "build",
            framework.build_command(),
            Duration::from_secs(config.build_timeout_secs),
            policy
        ),
    );
    ValidationResult {
        lint_output,
        build_output,
    }
}

#[derive(Debug)]
pub struct FixReport {
    pub state: AgentState,
    /// Errors still reported after the last attempt.
    pub remaining_errors: Option<String>,
}

/// Validate, and while it fails re-run the agent with the errors, up to
/// `config.max_fix_attempts` times.
///
/// Only cancellation is returned as an error. A gateway failure during a
/// fix pass ends the cycle with the last known errors.
pub async fn validate_and_fix(
    ctx: &AgentContext<'_>,
    system_prompt: &str,
    original_prompt: &str,
    state: AgentState,
    config: &ValidationConfig,
) -> Result<FixReport, RunError> {
    let mut state = state;

    loop {
        ctx.emitter.status("Validating project");
        let result = tokio::select! {
            result = validate(ctx.sandbox, state.framework, config) => result,
            _ = ctx.cancel.cancelled() => return Err(RunError::Cancelled),
        };
        let Some(errors) = result.errors() else {
            tracing::info!(fix_attempts = state.fix_attempts, "validation passed");
            return Ok(FixReport {
                state,
                remaining_errors: None,
            });
        };

        if state.fix_attempts >= config.max_fix_attempts {
            tracing::warn!(
                fix_attempts = state.fix_attempts,
                "fix attempts exhausted, reporting remaining errors"
            );
            return Ok(FixReport {
                state,
                remaining_errors: Some(errors),
            });
        }

        state.fix_attempts += 1;
        tracing::info!(attempt = state.fix_attempts, "validation failed, starting auto-fix");
        ctx.emitter.emit(ProgressEvent::Autofix {
            attempt: state.fix_attempts,
            max_attempts: config.max_fix_attempts,
            errors: errors.clone(),
        });

        let paths: Vec<&str> = state.paths().collect();
        let conversation = vec![Message::user(prompts::fix_prompt(
            original_prompt,
            &paths,
            &errors,
        ))];
        let outcome = run_agent(ctx, system_prompt, conversation, state).await;
        state = outcome.state;

        match outcome.stop {
            StopReason::Failed(RunError::Cancelled) => return Err(RunError::Cancelled),
            StopReason::Failed(e) => {
                tracing::warn!(error = %e, "auto-fix pass failed, keeping remaining errors");
                return Ok(FixReport {
                    state,
                    remaining_errors: Some(errors),
                });
            }
            StopReason::Finished | StopReason::IterationLimit => {}
        }
    }
}
