mod agent;
mod commands;
mod config;
mod envfiles;
mod error;
mod git;
mod instructions;
mod issues;
mod lockfile;
mod manifest;
mod ports;
mod slug;
mod subprocess;
mod telemetry;
mod workspace;

#[cfg(test)]
mod testutil;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::clean::CleanArgs;
use commands::doctor::DoctorArgs;
use commands::init::InitArgs;
use commands::run::RunArgs;
use commands::status::StatusArgs;

#[derive(Debug, Parser)]
#[command(
    name = "fanout",
    version,
    about = "Run coding agents on parallel features in isolated git worktrees"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fan features out to parallel agent runs
    Run(RunArgs),
    /// Show the run manifest with per-feature liveness
    Status(StatusArgs),
    /// Remove feature workspaces, keeping branches with commits
    Clean(CleanArgs),
    /// Write a commented default .fanout.toml
    Init(InitArgs),
    /// Validate prerequisites and project state
    Doctor(DoctorArgs),
    /// Print the JSON Schema for .fanout.toml
    Schema,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::Status(_) => "status",
            Self::Clean(_) => "clean",
            Self::Init(_) => "init",
            Self::Doctor(_) => "doctor",
            Self::Schema => "schema",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Run(args) => args.execute(),
        Commands::Status(args) => args.execute(),
        Commands::Clean(args) => args.execute(),
        Commands::Init(args) => args.execute(),
        Commands::Doctor(args) => args.execute(),
        Commands::Schema => commands::schema::run_schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
