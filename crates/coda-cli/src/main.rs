//! Coda CLI - iteratively reduce unsafe code with a language model
//!
//! Usage:
//!   coda init [DIR]                 Write a starter coda.toml
//!   coda run [-c coda.toml]         Run strategies until no progress is made
//!   coda count <file>               Count unsafe blocks and lines
//!   coda apply <file> <patch.json>  Apply a replacement set offline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coda_agent::{get_auth_token, parse_patch_response, AgentClient, LlmCollaborator, Model};
use coda_core::{CodaConfig, MatchPolicy, CONFIG_FILE_NAME};
use coda_orchestrator::{LiveWorkspace, PristineGuard, RunArtifacts, RunLogger, RunReport, Session};
use coda_patch::SafetyScanner;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "coda")]
#[command(author, version, about = "Iteratively reduce unsafe code with a language model")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default coda.toml
    Init {
        /// Directory to write into (defaults to current directory)
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Run the strategy loop against the configured target
    Run {
        /// Config file
        #[arg(short, long, default_value = CONFIG_FILE_NAME)]
        config: PathBuf,

        /// Model override (opus, sonnet, haiku)
        #[arg(short, long)]
        model: Option<String>,

        /// Stop after this many strategies
        #[arg(long)]
        max_strategies: Option<usize>,

        /// Disable the elapsed-time ticker
        #[arg(long)]
        no_progress: bool,
    },

    /// Count unsafe blocks and the code lines inside them
    Count {
        file: PathBuf,

        /// Keyword that opens an unsafe region
        #[arg(long, default_value = "unsafe")]
        keyword: String,
    },

    /// Apply a replacement set to a file
    Apply {
        file: PathBuf,

        /// JSON replacement set
        patch: PathBuf,

        /// How ambiguous fragments are handled (unique, first)
        #[arg(long, default_value = "unique")]
        policy: MatchPolicy,

        /// Overwrite the file instead of printing the result
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { dir } => cmd_init(dir),
        Commands::Run {
            config,
            model,
            max_strategies,
            no_progress,
        } => cmd_run(config, model, max_strategies, no_progress).await,
        Commands::Count { file, keyword } => cmd_count(file, keyword).await,
        Commands::Apply {
            file,
            patch,
            policy,
            write,
        } => cmd_apply(file, patch, policy, write).await,
    }
}

fn cmd_init(dir: PathBuf) -> Result<()> {
    let path = CodaConfig::write_default(&dir).context("Failed to write config")?;
    println!("Created {}", path.display());
    println!("Edit target.code_path, build_command, test_command and test_expected_output,");
    println!("then start with: coda run");
    Ok(())
}

async fn cmd_run(
    config_path: PathBuf,
    model: Option<String>,
    max_strategies: Option<usize>,
    no_progress: bool,
) -> Result<()> {
    let mut config = CodaConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if let Some(model) = model {
        config.model.default = model;
    }
    if let Some(max) = max_strategies {
        config.loop_settings.max_strategies = max;
    }
    if no_progress {
        config.log.show_progress = false;
    }
    config.validate()?;

    let model: Model = config.model.default.parse().map_err(anyhow::Error::msg)?;
    get_auth_token().context("No credentials for the Anthropic API")?;
    let collaborator =
        LlmCollaborator::new(AgentClient::new(model).with_max_tokens(config.model.max_tokens));

    let guard = PristineGuard::capture(LiveWorkspace::from_target(&config.target))
        .await
        .context("Failed to read the target")?;
    let mut logger = RunLogger::open(&config.log.dir, guard.pristine())
        .await
        .context("Failed to prepare the log folder")?;
    let mut session = Session::new(&config, &collaborator, guard.pristine().clone());

    info!("Target: {} (model {})", config.target.code_path.display(), model);

    let outcome = tokio::select! {
        result = session.run(&mut logger) => Some(result),
        _ = shutdown_signal() => None,
    };

    // Same cleanup on every exit path
    let artifacts = logger.finish(session.best_count()).await;
    let restored = guard.restore();

    match &outcome {
        Some(Ok(report)) => print_report(report),
        Some(Err(e)) => warn!("Run failed: {}", e),
        None => warn!("Interrupted, restoring {}", config.target.code_path.display()),
    }
    print_artifacts(&artifacts);

    let usage = collaborator.client().total_usage();
    println!(
        "Tokens used: {} in / {} out",
        usage.input_tokens, usage.output_tokens
    );

    restored.context("Failed to restore the original file")?;
    if let Some(Err(e)) = outcome {
        return Err(e.into());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    println!("Stopped: {}", report.stop_reason);
    println!(
        "Strategies: {} tried, {} succeeded",
        report.strategies.len(),
        report.successes()
    );
    println!(
        "Unsafe lines: {} -> {}",
        report.initial.line_count, report.final_count.line_count
    );
}

fn print_artifacts(artifacts: &RunArtifacts) {
    println!("Logs saved to {}", artifacts.run_dir.display());
    if let Some(path) = &artifacts.best_code {
        println!("Best code saved to {}", path.display());
    }
    if let Some(path) = &artifacts.best_manifest {
        println!("Best manifest saved to {}", path.display());
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn cmd_count(file: PathBuf, keyword: String) -> Result<()> {
    let source = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let count = SafetyScanner::new(keyword).count(&source);

    println!("{}", file.display());
    println!("  Unsafe blocks: {}", count.block_count);
    println!("  Unsafe lines:  {}", count.line_count);
    Ok(())
}

async fn cmd_apply(file: PathBuf, patch: PathBuf, policy: MatchPolicy, write: bool) -> Result<()> {
    let source = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let answer = tokio::fs::read_to_string(&patch)
        .await
        .with_context(|| format!("Failed to read {}", patch.display()))?;

    let proposal = parse_patch_response(&answer)?;
    if !proposal.manifest_replacements.is_empty() {
        warn!(
            "Ignoring {} manifest replacements",
            proposal.manifest_replacements.len()
        );
    }

    let patched = coda_patch::apply(&source, &proposal.replacements, policy)?;

    if write {
        tokio::fs::write(&file, &patched)
            .await
            .with_context(|| format!("Failed to write {}", file.display()))?;
        println!(
            "Applied {} replacements to {}",
            proposal.replacements.len(),
            file.display()
        );
    } else {
        print!("{}", patched);
    }
    Ok(())
}
