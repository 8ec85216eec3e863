//! Tools exposed to the model and their handlers.
//!
//! Handlers never fail: every problem is reported back to the model as a
//! tool result. What a handler changed is returned as a [`ToolOutcome`]
//! for the loop to fold into the run state.

use serde::Deserialize;
use serde_json::{Value, json};

use super::AgentContext;
use crate::llm::{ToolCall, ToolDefinition};
use crate::sandbox::CommandOutput;
use crate::sandbox::paths::{WorkspacePath, validate_path};

pub const RUN_COMMAND: &str = "run_command";
pub const WRITE_FILES: &str = "write_files";
pub const READ_FILES: &str = "read_files";

/// Command output sent back to the model is cut to its tail.
const MAX_TOOL_OUTPUT_CHARS: usize = 20_000;

#[derive(Debug, Deserialize)]
struct RunCommandInput {
    command: String,
}

#[derive(Debug, Deserialize)]
struct FileInput {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WriteFilesInput {
    files: Vec<FileInput>,
}

#[derive(Debug, Deserialize)]
struct ReadFilesInput {
    paths: Vec<String>,
}

/// Result of one tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
    /// Files written by this call, keyed by workspace-relative path.
    pub written: Vec<(String, String)>,
}

impl ToolOutcome {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            written: Vec::new(),
        }
    }
}

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: RUN_COMMAND.into(),
            description: "Run a shell command in the workspace. Returns exit code, stdout and stderr."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command to run with sh -c"}
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: WRITE_FILES.into(),
            description: "Create or overwrite files in the workspace.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": {"type": "string"},
                                "content": {"type": "string"}
                            },
                            "required": ["path", "content"]
                        }
                    }
                },
                "required": ["files"]
            }),
        },
        ToolDefinition {
            name: READ_FILES.into(),
            description: "Read files from the workspace. Unreadable files come back as null."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "paths": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["paths"]
            }),
        },
    ]
}

fn parse_input<T: for<'de> Deserialize<'de>>(call: &ToolCall) -> Result<T, ToolOutcome> {
    serde_json::from_value(call.input.clone())
        .map_err(|e| ToolOutcome::error(format!("Invalid input for {}: {}", call.name, e)))
}

pub async fn execute(ctx: &AgentContext<'_>, call: &ToolCall) -> ToolOutcome {
    let outcome = match call.name.as_str() {
        RUN_COMMAND => match parse_input::<RunCommandInput>(call) {
            Ok(input) => run_command(ctx, &input.command).await,
            Err(outcome) => outcome,
        },
        WRITE_FILES => match parse_input::<WriteFilesInput>(call) {
            Ok(input) => write_files(ctx, input.files).await,
            Err(outcome) => outcome,
        },
        READ_FILES => match parse_input::<ReadFilesInput>(call) {
            Ok(input) => read_files(ctx, &input.paths).await,
            Err(outcome) => outcome,
        },
        other => ToolOutcome::error(format!("Unknown tool: {}", other)),
    };
    if outcome.is_error {
        tracing::debug!(tool = %call.name, result = %outcome.content, "tool call failed");
    }
    outcome
}

async fn run_command(ctx: &AgentContext<'_>, command: &str) -> ToolOutcome {
    tracing::debug!(command, "running command");
    let result = tokio::select! {
        result = ctx.sandbox.run_command(command, ctx.config.command_timeout()) => result,
        _ = ctx.cancel.cancelled() => return ToolOutcome::error("Command cancelled"),
    };
    match result {
        Ok(out) => ToolOutcome::ok(format_command_output(&out)),
        Err(e) => ToolOutcome::error(format!("Command failed: {}", e)),
    }
}

fn format_command_output(out: &CommandOutput) -> String {
    format!(
        "exit_code: {}\nstdout:\n{}\nstderr:\n{}",
        out.exit_code,
        tail(&out.stdout, MAX_TOOL_OUTPUT_CHARS),
        tail(&out.stderr, MAX_TOOL_OUTPUT_CHARS)
    )
}

fn tail(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    match s.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Validate every path of a batch up front; one bad path rejects it all.
fn validate_batch<'a>(
    paths: impl IntoIterator<Item = &'a str>,
    workspace_root: &str,
) -> Result<Vec<WorkspacePath>, ToolOutcome> {
    paths
        .into_iter()
        .map(|p| validate_path(p, workspace_root))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ToolOutcome::error(format!("Rejected batch, nothing was touched: {}", e)))
}

async fn write_files(ctx: &AgentContext<'_>, files: Vec<FileInput>) -> ToolOutcome {
    if files.is_empty() {
        return ToolOutcome::error("No files provided");
    }
    let paths = match validate_batch(
        files.iter().map(|f| f.path.as_str()),
        &ctx.config.workspace_root,
    ) {
        Ok(paths) => paths,
        Err(outcome) => return outcome,
    };

    let mut written = Vec::new();
    let mut failures = Vec::new();
    for (path, file) in paths.into_iter().zip(files) {
        match ctx.sandbox.write_file(&path.absolute, &file.content).await {
            Ok(()) => written.push((path.relative, file.content)),
            Err(e) => failures.push(format!("{}: {}", path.relative, e)),
        }
    }

    let mut content = format!("Wrote {} file(s)", written.len());
    if !written.is_empty() {
        let names: Vec<&str> = written.iter().map(|(p, _)| p.as_str()).collect();
        content.push_str(&format!(": {}", names.join(", ")));
    }
    if !failures.is_empty() {
        content.push_str(&format!("\nFailed:\n{}", failures.join("\n")));
    }
    ToolOutcome {
        content,
        is_error: written.is_empty(),
        written,
    }
}

async fn read_files(ctx: &AgentContext<'_>, raw_paths: &[String]) -> ToolOutcome {
    let paths = match validate_batch(
        raw_paths.iter().map(String::as_str),
        &ctx.config.workspace_root,
    ) {
        Ok(paths) => paths,
        Err(outcome) => return outcome,
    };

    let mut contents = serde_json::Map::new();
    for path in paths {
        let value = match read_one(ctx, &path).await {
            Some(content) => Value::String(content),
            None => Value::Null,
        };
        contents.insert(path.relative, value);
    }
    ToolOutcome::ok(Value::Object(contents).to_string())
}

/// `None` when the file is missing, too large or too slow to read.
async fn read_one(ctx: &AgentContext<'_>, path: &WorkspacePath) -> Option<String> {
    let read = tokio::time::timeout(
        ctx.config.read_timeout(),
        ctx.sandbox.read_file(&path.absolute),
    )
    .await;
    match read {
        Ok(Ok(content)) if content.len() as u64 <= ctx.config.max_read_bytes => Some(content),
        Ok(Ok(content)) => {
            tracing::debug!(path = %path.relative, bytes = content.len(), "file too large, skipped");
            None
        }
        Ok(Err(e)) => {
            tracing::debug!(path = %path.relative, error = %e, "read failed, skipped");
            None
        }
        Err(_) => {
            tracing::debug!(path = %path.relative, "read timed out, skipped");
            None
        }
    }
}

/// Short human description of a tool call for the `tool` event.
pub fn describe_tool_call(call: &ToolCall) -> String {
    match call.name.as_str() {
        RUN_COMMAND => {
            let cmd = call
                .input
                .get("command")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 60))
                .unwrap_or_else(|| "command".to_string());
            format!("Running: {}", cmd)
        }
        WRITE_FILES => describe_paths("Writing", &call.input, "files", |f| {
            f.get("path").and_then(|p| p.as_str())
        }),
        READ_FILES => describe_paths("Reading", &call.input, "paths", |p| p.as_str()),
        other => format!("Using: {}", other),
    }
}

fn describe_paths(
    verb: &str,
    input: &Value,
    key: &str,
    path_of: impl Fn(&Value) -> Option<&str>,
) -> String {
    let items = input.get(key).and_then(|v| v.as_array());
    let paths: Vec<&str> = items
        .map(|items| items.iter().filter_map(&path_of).collect())
        .unwrap_or_default();
    match paths.as_slice() {
        [] => format!("{}: files", verb),
        [only] => format!("{}: {}", verb, only),
        [first, rest @ ..] => format!("{}: {} (+{} more)", verb, first, rest.len()),
    }
}

fn truncate_str(s: &str, max_chars: usize) -> String {
    let first_line = s.lines().next().unwrap_or(s);
    if first_line.chars().count() <= max_chars && first_line.len() == s.len() {
        return s.to_string();
    }
    let cut: String = first_line.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}
