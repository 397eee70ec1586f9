//! Procedure CLI - command-line host for the procedure orchestration core
//!
//! Loads a procedure definition from JSON and either checks it or runs it
//! on a driver thread, delivering `owner:token` signals in order and
//! reporting the final status and journal.

use clap::{Parser, Subcommand};
use std::ffi::OsString;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod error;
mod output;

pub use commands::run::{parse_signal, SignalArg};
pub use error::{CliError, CliResult};
pub use output::OutputFormat;

/// Procedure CLI application
#[derive(Parser)]
#[command(name = "procedure")]
#[command(about = "Procedure - sequence steps across decoupled components", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Build a definition, begin it and deliver signals
    Run(commands::run::RunArgs),

    /// Parse and validate a definition without running it
    Validate(commands::validate::ValidateArgs),
}

/// Run using the current process arguments.
pub async fn run() -> CliResult<()> {
    run_with_args(std::env::args_os()).await
}

/// Run using the provided argument iterator.
pub async fn run_with_args<I, T>(args: I) -> CliResult<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.output).await,
        Commands::Validate(args) => commands::validate::execute(args, cli.output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_accepts_repeated_signals() {
        let cli = Cli::try_parse_from([
            "procedure",
            "--output",
            "json",
            "run",
            "intro.json",
            "--signal",
            "Intro:s2",
            "-s",
            "Sub:done",
            "--diagnostics",
        ])
        .unwrap();

        assert!(matches!(cli.output, OutputFormat::Json));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.definition.to_str(), Some("intro.json"));
                assert_eq!(args.signals.len(), 2);
                assert_eq!(args.signals[1].owner, "Sub");
                assert_eq!(args.signals[1].token, "done");
                assert!(args.diagnostics);
                assert!(!args.no_journal);
                assert_eq!(args.journal_capacity, procedure_engine::DEFAULT_JOURNAL_CAPACITY);
            }
            Commands::Validate(_) => panic!("expected run"),
        }
    }

    #[test]
    fn test_malformed_signal_is_a_usage_error() {
        let result = Cli::try_parse_from(["procedure", "run", "intro.json", "--signal", "nocolon"]);
        assert!(result.is_err());
    }
}
