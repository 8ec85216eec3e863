//! Tool-calling agent loop.
//!
//! ## Module Map
//!
//! | Module    | Responsibility                                         |
//! |-----------|--------------------------------------------------------|
//! | `tools`   | Tool definitions, handlers returning `ToolOutcome`     |
//! | `summary` | `<task_summary>` extraction, auto summary, titles      |
//! | `prompts` | System, fix and summary prompt text                    |
//!
//! A pass sends the conversation to the model, executes any requested tool
//! calls inside the sandbox, appends the results and repeats until the
//! model answers without tool calls or the iteration cap is hit.

pub mod prompts;
pub mod summary;
pub mod tools;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::RunError;
use crate::events::{ProgressEmitter, ProgressEvent};
use crate::llm::{ContentBlock, GenerateRequest, Message, ModelGateway, Role, ToolChoice};
use crate::models::Framework;
use crate::sandbox::Sandbox;
use crate::sandbox::paths::DEFAULT_WORKSPACE_ROOT;
use crate::tiers::TierSpec;

pub use tools::ToolOutcome;

/// `[agent]` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub command_timeout_secs: u64,
    pub read_timeout_ms: u64,
    pub max_read_bytes: u64,
    pub workspace_root: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            command_timeout_secs: 300,
            read_timeout_ms: 3_000,
            max_read_bytes: 10 * 1024 * 1024,
            workspace_root: DEFAULT_WORKSPACE_ROOT.to_string(),
        }
    }
}

impl AgentConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Per-run state, folded forward from tool outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentState {
    /// Workspace-relative path to last written content.
    pub files: BTreeMap<String, String>,
    pub summary: Option<String>,
    pub framework: Framework,
    pub fix_attempts: u32,
}

impl AgentState {
    pub fn new(framework: Framework) -> Self {
        Self {
            files: BTreeMap::new(),
            summary: None,
            framework,
            fix_attempts: 0,
        }
    }

    /// Fold one tool outcome in. Files are only added or overwritten.
    pub fn apply(mut self, outcome: &ToolOutcome) -> Self {
        for (path, content) in &outcome.written {
            self.files.insert(path.clone(), content.clone());
        }
        self
    }

    pub fn with_summary(mut self, summary: Option<String>) -> Self {
        if summary.is_some() {
            self.summary = summary;
        }
        self
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

/// Everything a pass needs besides the conversation.
pub struct AgentContext<'a> {
    pub gateway: &'a dyn ModelGateway,
    pub sandbox: &'a dyn Sandbox,
    pub emitter: &'a ProgressEmitter,
    pub tier: &'a TierSpec,
    pub max_tokens: u32,
    pub config: &'a AgentConfig,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug)]
pub enum StopReason {
    /// The model answered without tool calls.
    Finished,
    IterationLimit,
    /// Gateway failure or cancellation. The state is still valid.
    Failed(RunError),
}

#[derive(Debug)]
pub struct AgentOutcome {
    pub final_text: String,
    pub state: AgentState,
    pub iterations: u32,
    pub stop: StopReason,
}

impl AgentContext<'_> {
    fn request(
        &self,
        system: &str,
        messages: &[Message],
        tool_choice: ToolChoice,
    ) -> GenerateRequest {
        GenerateRequest {
            model: self.tier.model.clone(),
            max_tokens: self.max_tokens,
            system: system.to_string(),
            messages: messages.to_vec(),
            tools: tools::definitions(),
            tool_choice: Some(tool_choice),
            temperature: self.tier.temperature,
        }
    }
}

/// Run one bounded agent pass.
pub async fn run_agent(
    ctx: &AgentContext<'_>,
    system_prompt: &str,
    conversation: Vec<Message>,
    state: AgentState,
) -> AgentOutcome {
    let mut state = state;
    let mut messages = conversation;
    let mut final_text = String::new();
    let mut iterations = 0;
    let mut stop = StopReason::IterationLimit;

    for iteration in 1..=ctx.config.max_iterations {
        if ctx.cancel.is_cancelled() {
            stop = StopReason::Failed(RunError::Cancelled);
            break;
        }
        iterations = iteration;

        let request = ctx.request(system_prompt, &messages, ToolChoice::Auto);
        let response = match ctx.gateway.generate(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(iteration, error = %e, "model call failed");
                stop = StopReason::Failed(e.into());
                break;
            }
        };
        tracing::debug!(
            iteration,
            tool_calls = response.tool_calls.len(),
            "model turn"
        );

        if !response.text.trim().is_empty() {
            ctx.emitter.emit(ProgressEvent::Stream {
                text: response.text.clone(),
            });
        }
        state = state.with_summary(summary::extract_task_summary(&response.text));
        final_text = response.text.clone();
        messages.push(response.to_message());

        if response.tool_calls.is_empty() {
            stop = StopReason::Finished;
            break;
        }

        let mut results = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
            ctx.emitter.emit(ProgressEvent::Tool {
                name: call.name.clone(),
                detail: tools::describe_tool_call(call),
            });
            let outcome = tools::execute(ctx, call).await;
            if !outcome.written.is_empty() {
                ctx.emitter.emit(ProgressEvent::Files {
                    paths: outcome.written.iter().map(|(p, _)| p.clone()).collect(),
                });
            }
            state = state.apply(&outcome);
            results.push(ContentBlock::ToolResult {
                tool_use_id: call.id.clone(),
                content: outcome.content,
                is_error: outcome.is_error,
            });
        }
        messages.push(Message {
            role: Role::User,
            content: results,
        });
    }

    if matches!(stop, StopReason::IterationLimit) {
        tracing::warn!(
            max_iterations = ctx.config.max_iterations,
            "agent hit iteration cap"
        );
    }

    if !matches!(stop, StopReason::Failed(_)) {
        state = ensure_summary(ctx, system_prompt, messages, state).await;
    }

    AgentOutcome {
        final_text,
        state,
        iterations,
        stop,
    }
}

/// Files were written but no summary came back: ask once for text only,
/// then fall back to a summary built from the written paths.
async fn ensure_summary(
    ctx: &AgentContext<'_>,
    system_prompt: &str,
    mut messages: Vec<Message>,
    state: AgentState,
) -> AgentState {
    if state.summary.is_some() || state.files.is_empty() {
        return state;
    }

    // A trailing tool-result turn must be answered before another user turn.
    match messages.last_mut() {
        Some(last) if last.role == Role::User => last.content.push(ContentBlock::Text {
            text: prompts::SUMMARY_REQUEST.to_string(),
        }),
        _ => messages.push(Message::user(prompts::SUMMARY_REQUEST)),
    }

    // The history holds tool blocks, so tools stay defined but unusable.
    let request = ctx.request(system_prompt, &messages, ToolChoice::None);
    let summary = match ctx.gateway.generate(&request).await {
        Ok(response) => summary::extract_task_summary(&response.text),
        Err(e) => {
            tracing::warn!(error = %e, "summary re-prompt failed");
            None
        }
    };
    let summary = summary.unwrap_or_else(|| {
        tracing::debug!("no task summary produced, generating one from written paths");
        summary::auto_summary(state.paths())
    });
    state.with_summary(Some(summary))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::errors::GatewayError;
    use crate::llm::ModelResponse;
    use crate::testing::{MemorySandbox, ScriptedGateway};

    struct Fixture {
        gateway: ScriptedGateway,
        sandbox: MemorySandbox,
        emitter: ProgressEmitter,
        rx: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
        config: AgentConfig,
        spec: TierSpec,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new(responses: Vec<ModelResponse>) -> Self {
            let (emitter, rx) = ProgressEmitter::channel();
            Self {
                gateway: ScriptedGateway::new(responses),
                sandbox: MemorySandbox::new("sbx"),
                emitter,
                rx,
                config: AgentConfig::default(),
                spec: TierSpec {
                    model: "claude-test".into(),
                    temperature: 0.5,
                },
                cancel: CancellationToken::new(),
            }
        }

        fn ctx(&self) -> AgentContext<'_> {
            AgentContext {
                gateway: &self.gateway,
                sandbox: &self.sandbox,
                emitter: &self.emitter,
                tier: &self.spec,
                max_tokens: 4096,
                config: &self.config,
                cancel: &self.cancel,
            }
        }

        fn events(&mut self) -> Vec<ProgressEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn write(id: &str, path: &str, content: &str) -> ModelResponse {
        ModelResponse::text("").with_tool_call(
            id,
            tools::WRITE_FILES,
            json!({"files": [{"path": path, "content": content}]}),
        )
    }

    #[tokio::test]
    async fn loop_writes_files_and_stops_without_tool_calls() {
        let mut fx = Fixture::new(vec![
            write("t1", "app/page.tsx", "v1"),
            write("t2", "app/page.tsx", "v2"),
            ModelResponse::text("All done <task_summary>A landing page</task_summary>"),
        ]);
        let outcome = run_agent(
            &fx.ctx(),
            "system",
            vec![Message::user("build it")],
            AgentState::new(Framework::Nextjs),
        )
        .await;

        assert!(matches!(outcome.stop, StopReason::Finished));
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.state.files["app/page.tsx"], "v2");
        assert_eq!(outcome.state.summary.as_deref(), Some("A landing page"));
        assert_eq!(fx.gateway.calls(), 3);

        // Second request carries the first tool result.
        let second = &fx.gateway.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert!(matches!(
            &second.messages[2].content[0],
            ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "t1"
        ));
        assert_eq!(second.model, "claude-test");
        assert_eq!(second.tools.len(), 3);

        let events = fx.events();
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Files { paths } if paths == &["app/page.tsx"])));
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Tool { name, .. } if name == "write_files")));
    }

    #[tokio::test]
    async fn iteration_cap_is_respected() {
        let responses = (0..3)
            .map(|i| write(&format!("t{i}"), &format!("f{i}.ts"), "x"))
            .collect();
        let mut fx = Fixture::new(responses);
        fx.config.max_iterations = 3;
        fx.gateway.push(ModelResponse::text("<task_summary>capped</task_summary>"));

        let outcome = run_agent(
            &fx.ctx(),
            "system",
            vec![Message::user("go")],
            AgentState::new(Framework::React),
        )
        .await;
        assert!(matches!(outcome.stop, StopReason::IterationLimit));
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.state.files.len(), 3);
        // Three tool turns plus the summary re-prompt.
        assert_eq!(fx.gateway.calls(), 4);
        assert_eq!(outcome.state.summary.as_deref(), Some("capped"));
    }

    #[tokio::test]
    async fn missing_summary_triggers_one_text_only_reprompt() {
        let fx = Fixture::new(vec![
            write("t1", "src/App.tsx", "app"),
            ModelResponse::text("done"),
            ModelResponse::text("<task_summary>A React counter</task_summary>"),
        ]);
        let outcome = run_agent(
            &fx.ctx(),
            "system",
            vec![Message::user("counter")],
            AgentState::new(Framework::React),
        )
        .await;
        assert_eq!(outcome.state.summary.as_deref(), Some("A React counter"));
        let requests = fx.gateway.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].tool_choice, Some(ToolChoice::Auto));

        // The re-prompt replays tool blocks, so it must still define tools
        // while forbidding their use.
        let reprompt = &requests[2];
        assert!(reprompt.has_tool_blocks());
        let wire = serde_json::to_value(reprompt).unwrap();
        assert_eq!(wire["tools"].as_array().unwrap().len(), 3);
        assert_eq!(wire["tool_choice"], json!({"type": "none"}));
        assert_eq!(
            requests[2].messages.last().unwrap().text(),
            prompts::SUMMARY_REQUEST
        );
    }

    #[tokio::test]
    async fn reprompt_without_summary_falls_back_to_paths() {
        let fx = Fixture::new(vec![
            write("t1", "src/App.vue", "app"),
            ModelResponse::text("done"),
            ModelResponse::text("still no tag"),
        ]);
        let outcome = run_agent(
            &fx.ctx(),
            "system",
            vec![Message::user("vue")],
            AgentState::new(Framework::Vue),
        )
        .await;
        assert_eq!(
            outcome.state.summary.as_deref(),
            Some("Generated 1 file: src/App.vue.")
        );
    }

    #[tokio::test]
    async fn no_files_means_no_reprompt() {
        let fx = Fixture::new(vec![ModelResponse::text("I need more details.")]);
        let outcome = run_agent(
            &fx.ctx(),
            "system",
            vec![Message::user("?")],
            AgentState::new(Framework::Nextjs),
        )
        .await;
        assert_eq!(outcome.state.summary, None);
        assert_eq!(outcome.final_text, "I need more details.");
        assert_eq!(fx.gateway.calls(), 1);
    }

    #[tokio::test]
    async fn gateway_failure_keeps_state() {
        let fx = Fixture::new(vec![write("t1", "a.ts", "a")]);
        fx.gateway
            .push_error(GatewayError::Api {
                status: 500,
                message: "overloaded".into(),
            });
        let outcome = run_agent(
            &fx.ctx(),
            "system",
            vec![Message::user("go")],
            AgentState::new(Framework::Svelte),
        )
        .await;
        assert!(matches!(
            outcome.stop,
            StopReason::Failed(RunError::Generation(_))
        ));
        assert!(outcome.state.files.contains_key("a.ts"));
        assert_eq!(outcome.state.summary, None);
    }

    #[tokio::test]
    async fn cancellation_is_checked_between_iterations() {
        let fx = Fixture::new(vec![write("t1", "a.ts", "a")]);
        fx.cancel.cancel();
        let outcome = run_agent(
            &fx.ctx(),
            "system",
            vec![Message::user("go")],
            AgentState::new(Framework::Nextjs),
        )
        .await;
        assert!(matches!(outcome.stop, StopReason::Failed(RunError::Cancelled)));
        assert_eq!(fx.gateway.calls(), 0);
    }

    #[test]
    fn state_fold_overwrites_by_path() {
        let state = AgentState::new(Framework::Nextjs)
            .apply(&ToolOutcome {
                written: vec![("a".into(), "1".into()), ("b".into(), "1".into())],
                ..ToolOutcome::default()
            })
            .apply(&ToolOutcome {
                written: vec![("a".into(), "2".into())],
                ..ToolOutcome::default()
            });
        assert_eq!(state.files.len(), 2);
        assert_eq!(state.files["a"], "2");
        assert_eq!(state.with_summary(None).summary, None);
    }
}
