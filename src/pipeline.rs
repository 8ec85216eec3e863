//! One generation run, end to end.
//!
//! request -> framework + tier -> sandbox -> agent pass -> (safe mode)
//! validate & fix -> summary + title -> persist -> `complete`.
//!
//! [`Generator::run`] always emits exactly one terminal event.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::agent::{AgentConfig, AgentContext, AgentState, StopReason, prompts, run_agent, summary};
use crate::artifacts::{ArtifactStore, FsArtifactStore, RunArtifact};
use crate::config::CodegenConfig;
use crate::errors::{RunError, SandboxError};
use crate::events::{CompletionReport, ProgressEmitter, ProgressEvent};
use crate::llm::{AnthropicGateway, Message, ModelGateway};
use crate::models::{Framework, RunMode, RunRequest};
use crate::sandbox::local::LocalSandboxProvider;
use crate::sandbox::{SandboxCache, SandboxLease, SandboxManager};
use crate::selector::resolve_tier;
use crate::tiers::{GenerationModelTier, TierTable};
use crate::validate::{ValidationConfig, validate_and_fix};

/// Run-level knobs pulled from the config file.
#[derive(Debug, Clone, Default)]
pub struct GeneratorSettings {
    pub agent: AgentConfig,
    pub validation: ValidationConfig,
    pub max_tokens: u32,
    pub fallback_template: Option<String>,
}

pub struct Generator {
    gateway: Arc<dyn ModelGateway>,
    sandboxes: Arc<SandboxManager>,
    artifacts: Arc<dyn ArtifactStore>,
    tiers: TierTable,
    settings: GeneratorSettings,
}

impl Generator {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        sandboxes: Arc<SandboxManager>,
        artifacts: Arc<dyn ArtifactStore>,
        tiers: TierTable,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            gateway,
            sandboxes,
            artifacts,
            tiers,
            settings,
        }
    }

    /// Wire the shipped collaborators: Anthropic gateway, local directory
    /// sandboxes and JSON artifact files.
    pub fn from_config(config: &CodegenConfig) -> Result<Self, RunError> {
        let api_key = config
            .api_key()
            .map_err(|e| RunError::Setup(e.to_string()))?;
        let gateway = AnthropicGateway::with_base_url(api_key, config.gateway.base_url.clone());

        let mut provider = LocalSandboxProvider::new(
            config.sandbox.root.clone(),
            config.agent.workspace_root.clone(),
        );
        if let Some(dir) = &config.sandbox.templates_dir {
            provider = provider.with_templates_dir(dir.clone());
        }
        let manager = SandboxManager::new(
            Arc::new(provider),
            SandboxCache::new(config.sandbox.cache_ttl()),
            config.sandbox.retry,
            config.sandbox.idle_timeout(),
        );

        Ok(Self::new(
            Arc::new(gateway),
            Arc::new(manager),
            Arc::new(FsArtifactStore::new(config.artifacts.dir.clone())),
            config.tier_table(),
            GeneratorSettings {
                agent: config.agent.clone(),
                validation: config.validation.clone(),
                max_tokens: config.gateway.max_tokens,
                fallback_template: config.sandbox.fallback().map(str::to_string),
            },
        ))
    }

    pub fn sandboxes(&self) -> &Arc<SandboxManager> {
        &self.sandboxes
    }

    /// Execute a run, relaying progress through `emitter`.
    pub async fn run(
        &self,
        run_id: &str,
        request: RunRequest,
        emitter: ProgressEmitter,
        cancel: CancellationToken,
    ) {
        let span = tracing::info_span!("run", run_id, project_id = %request.project_id);
        async {
            match self.execute(run_id, &request, &emitter, &cancel).await {
                Ok(report) => {
                    tracing::info!(files = report.files.len(), "run complete");
                    emitter.emit(ProgressEvent::Complete(report));
                }
                Err(e) => {
                    tracing::error!(code = e.code(), error = %e, "run failed");
                    emitter.emit(ProgressEvent::Error {
                        code: e.code().to_string(),
                        message: e.user_message(),
                    });
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        run_id: &str,
        request: &RunRequest,
        emitter: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<CompletionReport, RunError> {
        check_request(request)?;

        let framework = request
            .framework
            .unwrap_or_else(|| Framework::detect(&request.prompt));
        let tier = resolve_tier(request.tier_request(), &request.prompt, Some(framework));
        tracing::info!(%framework, %tier, mode = ?request.mode, "run accepted");
        emitter.emit(ProgressEvent::Framework { framework, tier });

        emitter.status("Starting environment");
        let sandbox = tokio::select! {
            lease = self.sandbox_for(request, framework) => lease?,
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
        };
        let sandbox_url = sandbox.host(framework.dev_port());
        emitter.emit(ProgressEvent::Sandbox {
            sandbox_id: sandbox.id().to_string(),
            url: sandbox_url.clone(),
        });

        let spec = self.tiers.spec(tier);
        let ctx = AgentContext {
            gateway: self.gateway.as_ref(),
            sandbox: &*sandbox,
            emitter,
            tier: spec,
            max_tokens: self.settings.max_tokens,
            config: &self.settings.agent,
            cancel,
        };
        let system_prompt = prompts::system_prompt(framework, &self.settings.agent.workspace_root);

        emitter.status("Generating code");
        let outcome = run_agent(
            &ctx,
            &system_prompt,
            vec![Message::user(request.prompt.clone())],
            AgentState::new(framework),
        )
        .await;
        if let StopReason::Failed(e) = outcome.stop {
            return Err(e);
        }
        let mut state = outcome.state;

        let mut validation_errors = None;
        if request.mode == RunMode::Safe {
            let report = validate_and_fix(
                &ctx,
                &system_prompt,
                &request.prompt,
                state,
                &self.settings.validation,
            )
            .await?;
            state = report.state;
            validation_errors = report.remaining_errors;
        }

        let summary = match &state.summary {
            Some(summary) => summary.clone(),
            None if !outcome.final_text.trim().is_empty() => outcome.final_text.trim().to_string(),
            None => summary::auto_summary(state.paths()),
        };

        emitter.status("Naming project");
        let title = summary::generate_title(
            self.gateway.as_ref(),
            self.tiers.spec(GenerationModelTier::Fast),
            &request.prompt,
            &summary,
        )
        .await;

        let report = CompletionReport {
            run_id: run_id.to_string(),
            title,
            summary,
            sandbox_id: sandbox.id().to_string(),
            sandbox_url,
            tier,
            files: state.files.keys().cloned().collect(),
            validation_errors,
        };

        let artifact = RunArtifact {
            run_id: run_id.to_string(),
            project_id: request.project_id.clone(),
            title: report.title.clone(),
            summary: report.summary.clone(),
            files: state.files,
            sandbox_id: report.sandbox_id.clone(),
            sandbox_url: report.sandbox_url.clone(),
            tier,
            framework,
            validation_errors: report.validation_errors.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.artifacts.save(&artifact).await {
            tracing::warn!(error = %e, "failed to persist artifact");
        }

        Ok(report)
    }

    /// Resume the requested sandbox, or create one with an optional
    /// fallback to the generic template.
    async fn sandbox_for(
        &self,
        request: &RunRequest,
        framework: Framework,
    ) -> Result<SandboxLease, SandboxError> {
        if let Some(id) = request.sandbox_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return self.sandboxes.resolve(id).await;
        }
        match self.sandboxes.acquire(framework).await {
            Ok(lease) => Ok(lease),
            Err(e @ SandboxError::Provision { .. }) => match self.settings.fallback_template.as_deref() {
                Some(fallback) if fallback != framework.template() => {
                    tracing::warn!(error = %e, fallback, "retrying with fallback template");
                    self.sandboxes.acquire_template(fallback).await
                }
                _ => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

fn check_request(request: &RunRequest) -> Result<(), RunError> {
    if request.prompt.trim().is_empty() {
        return Err(RunError::Setup("Prompt must not be empty.".into()));
    }
    if request.project_id.trim().is_empty() {
        return Err(RunError::Setup("Project id must not be empty.".into()));
    }
    Ok(())
}
