use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use forge_codegen::config::CodegenConfig;
use forge_codegen::models::{Framework, RunMode};

mod cmd;

#[derive(Parser)]
#[command(name = "forge-codegen")]
#[command(version, about = "Prompt in, runnable web app out: an AI code-generation agent")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to codegen.toml (defaults to .forge/codegen.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Address to bind (overrides [server] host)
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on (overrides [server] port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (CORS permissive for a local frontend)
        #[arg(long)]
        dev: bool,
    },
    /// Run one generation and print its events as NDJSON
    Run {
        /// What to build
        #[arg(short, long)]
        prompt: String,

        #[arg(long, default_value = "cli")]
        project_id: String,

        /// Model tier: auto, fast, balanced, code_focused, complex
        #[arg(long)]
        tier: Option<String>,

        /// Framework (detected from the prompt when omitted)
        #[arg(long)]
        framework: Option<Framework>,

        /// fast skips validation, safe validates and auto-fixes
        #[arg(long, default_value = "fast")]
        mode: RunMode,

        /// Continue inside an existing sandbox
        #[arg(long)]
        sandbox_id: Option<String>,
    },
    /// Show which tier a prompt would be routed to
    Select {
        #[arg(short, long)]
        prompt: String,

        #[arg(long)]
        framework: Option<Framework>,
    },
    /// List model tiers and their bound models
    Tiers,
    /// View, create or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default codegen.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let mut config = match (&cli.command, cli.config.as_deref()) {
        // `config init` is how a missing explicit file gets created.
        (
            Commands::Config {
                command: Some(ConfigCommands::Init),
            },
            Some(path),
        ) if !path.exists() => CodegenConfig::default(),
        (_, path) => CodegenConfig::load_or_default(path)?,
    };
    config.apply_env();
    let _log_guard = forge_codegen::logging::init(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve { host, port, dev } => {
            cmd::cmd_serve(&config, host.clone(), *port, *dev).await?
        }
        Commands::Run {
            prompt,
            project_id,
            tier,
            framework,
            mode,
            sandbox_id,
        } => {
            let mut request = forge_codegen::models::RunRequest::new(project_id, prompt)
                .with_mode(*mode);
            if let Some(framework) = framework {
                request = request.with_framework(*framework);
            }
            if let Some(tier) = tier {
                request = request.with_model(tier);
            }
            if let Some(id) = sandbox_id {
                request = request.with_sandbox_id(id);
            }
            cmd::cmd_run(&config, request).await?
        }
        Commands::Select { prompt, framework } => cmd::cmd_select(prompt, *framework),
        Commands::Tiers => cmd::cmd_tiers(&config),
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), command.clone())?
        }
    }

    Ok(())
}
