//! `procedure run`

use super::load_definition;
use crate::error::{CliError, CliResult};
use crate::output::{self, OutputFormat, RunReport};
use clap::Args;
use procedure_engine::{
    ComponentTable, DispatchRequest, Driver, OrchestratorConfig, ProcedureBuilder,
    ProcedureDefinition, ProcedureError, DEFAULT_JOURNAL_CAPACITY,
};
use std::path::PathBuf;

/// Arguments for `run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to a procedure definition (JSON)
    pub definition: PathBuf,

    /// Deliver a token to an owner after the root begins (owner:token, repeatable)
    #[arg(short, long = "signal", value_parser = parse_signal)]
    pub signals: Vec<SignalArg>,

    /// Trace every begin, handle and reset at debug level
    #[arg(long)]
    pub diagnostics: bool,

    /// Do not keep a journal
    #[arg(long)]
    pub no_journal: bool,

    /// Most journal entries kept per orchestrator
    #[arg(long, default_value_t = DEFAULT_JOURNAL_CAPACITY)]
    pub journal_capacity: usize,
}

/// An `owner:token` pair from the command line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalArg {
    pub owner: String,
    pub token: String,
}

impl std::fmt::Display for SignalArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.owner, self.token)
    }
}

/// Parse `owner:token`. The token may be empty; the owner may not.
pub fn parse_signal(raw: &str) -> Result<SignalArg, String> {
    let (owner, token) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected owner:token, got '{}'", raw))?;
    if owner.is_empty() {
        return Err(format!("missing owner in '{}'", raw));
    }
    Ok(SignalArg {
        owner: owner.to_string(),
        token: token.to_string(),
    })
}

/// Execute `run`
pub async fn execute(args: RunArgs, format: OutputFormat) -> CliResult<()> {
    let definition = load_definition(&args.definition)?;
    let config = OrchestratorConfig {
        diagnostics: args.diagnostics,
        journal: !args.no_journal,
        journal_capacity: args.journal_capacity,
    };
    let report = run_definition(definition, &args.signals, config).await?;
    output::print_report(&report, format)
}

/// Build `definition` on a driver, begin its root and deliver `signals`.
///
/// Signals addressed to unknown owners are dropped and listed in the report.
pub async fn run_definition(
    definition: ProcedureDefinition,
    signals: &[SignalArg],
    config: OrchestratorConfig,
) -> CliResult<RunReport> {
    let root = definition.name.clone();
    let components = definition.components();

    let driver = Driver::spawn(move |registry, _driver| {
        let mut table = ComponentTable::new();
        for component in components {
            table.insert(component, |request: &DispatchRequest| {
                tracing::info!(
                    owner = %request.owner,
                    token = %request.token,
                    component = %request.component,
                    command = %request.command,
                    "Dispatched"
                );
            });
        }
        let root = ProcedureBuilder::new(registry, &table)
            .with_config(config)
            .build(&definition)?;
        root.register()?;
        Ok(())
    })
    .await?;

    driver.begin(root.as_str()).await?;

    let mut dropped_signals = Vec::new();
    for signal in signals {
        match driver.signal(&signal.owner, &signal.token).await {
            Ok(()) => {}
            Err(ProcedureError::UnknownOwner(owner)) => {
                tracing::warn!(%owner, token = %signal.token, "Signal dropped: unknown owner");
                dropped_signals.push(signal.to_string());
            }
            Err(err) => return Err(CliError::Procedure(err)),
        }
    }

    let status = driver.status(root.as_str()).await?;
    let journal = driver.journal(root.as_str()).await?;
    driver.shutdown().await?;

    Ok(RunReport {
        status,
        dropped_signals,
        journal,
    })
}
