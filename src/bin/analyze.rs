//! DropCoach analysis CLI.
//!
//! Runs the analysis pipeline for one user against the configured database
//! and prints the result as JSON on stdout. Logs go to stderr.
//!
//! Usage:
//!   dropcoach-analyze analyze <user-id>
//!   dropcoach-analyze eligibility <user-id>
//!   dropcoach-analyze list <user-id> [--limit N]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use dropcoach_lib::error::AnalysisFailure;
use dropcoach_lib::state::{load_config, load_config_from, AppState};

#[derive(Debug, Parser)]
#[command(name = "dropcoach-analyze", version, about = "Generate reflection analyses from journal drops")]
struct Cli {
    /// Config file (defaults to ~/.dropcoach/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline and commit a new analysis
    Analyze { user_id: String },
    /// Show how many unanalyzed entries the user has
    Eligibility { user_id: String },
    /// List the user's analyses, newest first
    List {
        user_id: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // try_init also routes `log` records into the subscriber
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to serialize output: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_failure(failure: &AnalysisFailure) -> ExitCode {
    print_json(failure);
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let config = match cli.config.as_deref() {
        Some(path) => load_config_from(path),
        None => load_config(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let state = match AppState::init(config) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Analyze { user_id } => match state.orchestrator.run(&user_id).await {
            Ok(outcome) => print_json(&outcome),
            Err(failure) => print_failure(&failure),
        },
        Command::Eligibility { user_id } => match state.orchestrator.eligibility(&user_id).await {
            Ok(eligibility) => print_json(&eligibility),
            Err(err) => print_failure(&AnalysisFailure::from(&err)),
        },
        Command::List { user_id, limit } => {
            let db = state.store.db();
            let analyses = tokio::task::spawn_blocking(move || {
                db.lock().get_analyses_for_user(&user_id, limit)
            })
            .await;
            match analyses {
                Ok(Ok(analyses)) => print_json(&analyses),
                Ok(Err(e)) => {
                    eprintln!("Failed to list analyses: {}", e);
                    ExitCode::FAILURE
                }
                Err(e) => {
                    eprintln!("Failed to list analyses: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
