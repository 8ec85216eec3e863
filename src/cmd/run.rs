//! One-shot generation command — `forge-codegen run`.
//!
//! Events go to stdout as NDJSON, one per line, in emission order. Ctrl+C
//! cancels the run, which still ends with its terminal `error` event. A
//! setup failure before the run starts is reported the same way.

use std::io::Write;

use anyhow::{Context, Result};
use console::style;
use forge_codegen::config::CodegenConfig;
use forge_codegen::events::{ProgressEmitter, ProgressEvent};
use forge_codegen::models::RunRequest;
use forge_codegen::pipeline::Generator;
use tokio_util::sync::CancellationToken;

fn print_event(event: &ProgressEvent) -> Result<()> {
    let mut stdout = std::io::stdout();
    stdout
        .write_all(event.to_ndjson().as_bytes())
        .and_then(|_| stdout.flush())
        .context("Failed to write event to stdout")
}

pub async fn cmd_run(config: &CodegenConfig, request: RunRequest) -> Result<()> {
    let generator = match Generator::from_config(config) {
        Ok(generator) => generator,
        Err(e) => {
            print_event(&ProgressEvent::Error {
                code: e.code().to_string(),
                message: e.user_message(),
            })?;
            return Err(e.into());
        }
    };
    let run_id = uuid::Uuid::new_v4().to_string();
    let (emitter, mut rx) = ProgressEmitter::channel();
    let cancel = CancellationToken::new();

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", style("Cancelling...").yellow());
                cancel.cancel();
            }
        })
    };

    let run = {
        let run_id = run_id.clone();
        async move { generator.run(&run_id, request, emitter, cancel).await }
    };
    let print = async move {
        let mut last = None;
        while let Some(event) = rx.recv().await {
            print_event(&event)?;
            last = Some(event);
        }
        Ok::<_, anyhow::Error>(last)
    };

    let ((), last) = tokio::join!(run, print);
    interrupt.abort();

    match last? {
        Some(ProgressEvent::Complete(report)) => {
            eprintln!();
            eprintln!("{} {}", style("✓").green().bold(), style(&report.title).bold());
            eprintln!("  {}", report.summary);
            eprintln!("  {} {}", style("Preview:").dim(), report.sandbox_url);
            if let Some(errors) = &report.validation_errors {
                eprintln!(
                    "  {} {} line(s) of validation errors remain",
                    style("!").yellow(),
                    errors.lines().count()
                );
            }
            Ok(())
        }
        Some(ProgressEvent::Error { code, message }) => {
            anyhow::bail!("Run {} failed ({}): {}", run_id, code, message)
        }
        _ => anyhow::bail!("Run {} ended without a terminal event", run_id),
    }
}
