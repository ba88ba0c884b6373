//! `uiflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — statically validate a flow JSON file.
//! - `run`      — execute a flow file. No automation backend is attached in
//!   this host, so element actions fail while logic flows (variables,
//!   loops, delays) run normally. Ctrl-C pauses the flow.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use actions::NullLocator;
use engine::{
    ActionRegistry, ExecutorConfig, Flow, FlowExecutor, FlowValidationSummary, Outcome,
    ResumeMode,
};

#[derive(Parser)]
#[command(name = "uiflow", about = "Desktop automation flow runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a flow definition JSON file.
    Validate {
        /// Path to the flow JSON file.
        path: PathBuf,
    },
    /// Execute a flow definition JSON file.
    Run {
        /// Path to the flow JSON file.
        path: PathBuf,
        /// Resume nested composites at their recorded positions instead of
        /// re-running them from the start.
        #[arg(long)]
        full_path_resume: bool,
    },
}

fn load_flow(path: &PathBuf) -> anyhow::Result<Flow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    Flow::from_json(&content).context("invalid flow definition")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let flow = load_flow(&path)?;
            let summary = FlowValidationSummary::from_diagnostics(flow.validate_syntax());
            print!("{}", summary.report());
            if !summary.is_valid() {
                std::process::exit(1);
            }
        }

        Command::Run {
            path,
            full_path_resume,
        } => {
            let mut flow = load_flow(&path)?;

            let summary = FlowValidationSummary::from_diagnostics(flow.validate_syntax());
            if !summary.is_valid() {
                eprint!("{}", summary.report());
                eprintln!("refusing to run a flow with blocking diagnostics");
                std::process::exit(1);
            }

            let resume_mode = if full_path_resume {
                ResumeMode::FullPath
            } else {
                ResumeMode::Shallow
            };
            let executor = FlowExecutor::new(ActionRegistry::with_builtins(), Arc::new(NullLocator))
                .with_config(ExecutorConfig { resume_mode });

            // Ctrl-C requests a cooperative pause, not an abort.
            let cancel = CancellationToken::new();
            let pause = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("ctrl-c received, pausing flow");
                    pause.cancel();
                }
            });

            match executor.execute(&mut flow, cancel).await {
                Outcome::Success => println!("flow '{}' completed successfully", flow.name),
                Outcome::Paused => {
                    let at = flow
                        .current_action()
                        .map(|a| a.display_name().to_owned())
                        .unwrap_or_else(|| "start".into());
                    println!("flow '{}' paused at '{at}'", flow.name);
                    std::process::exit(2);
                }
                Outcome::Failure(reason) => {
                    eprintln!("flow '{}' failed: {reason}", flow.name);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
