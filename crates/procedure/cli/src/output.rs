//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use procedure_engine::{JournalEntry, ProcedureState, ProcedureStatus, StepStatus, Token};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Everything `run` reports
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub status: ProcedureStatus,
    pub dropped_signals: Vec<String>,
    pub journal: Vec<JournalEntry>,
}

pub fn print_report(report: &RunReport, format: OutputFormat) -> crate::CliResult<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            print_status(&report.status);
            if !report.dropped_signals.is_empty() {
                println!();
                println!("{}", "Dropped signals".bold().yellow());
                for signal in &report.dropped_signals {
                    println!("  {}", signal);
                }
            }
            println!();
            println!("{}", "Journal".bold().cyan());
            println!("{}", "=".repeat(60));
            for entry in &report.journal {
                println!(
                    "  {}  {}",
                    entry.at.format("%H:%M:%S%.3f").to_string().dimmed(),
                    entry.event
                );
            }
        }
    }
    Ok(())
}

/// Table row for step display
#[derive(Debug, Serialize, Tabled)]
pub struct StepRow {
    /// Marks the step the orchestrator is waiting on
    #[tabled(rename = "")]
    pub current: String,
    /// Completion token
    pub step: String,
    pub kind: String,
    pub started: String,
    pub done: String,
}

impl StepRow {
    pub fn new(step: &StepStatus, current: Option<&Token>) -> Self {
        let marker = if current == Some(&step.id) { "▶" } else { "" };
        Self {
            current: marker.to_string(),
            step: step.id.to_string(),
            kind: step.kind.to_string(),
            started: yes_no(step.has_started),
            done: yes_no(step.done),
        }
    }
}

pub fn step_rows(status: &ProcedureStatus) -> Vec<StepRow> {
    status
        .steps
        .iter()
        .map(|step| StepRow::new(step, status.current.as_ref()))
        .collect()
}

pub fn print_status(status: &ProcedureStatus) {
    let state = match status.state {
        ProcedureState::Idle => status.state.to_string().dimmed(),
        ProcedureState::Running => status.state.to_string().yellow(),
        ProcedureState::Complete => status.state.to_string().green(),
    };
    println!("{} {}", status.name.as_str().bold().cyan(), state);

    let rows = step_rows(status);
    if rows.is_empty() {
        println!("{}", "No steps".dimmed());
    } else {
        println!("{}", Table::new(rows));
    }
    println!(
        "  completed runs: {}   pending: {}",
        status.completed_runs,
        status.pending.len()
    );
}

fn yes_no(flag: bool) -> String {
    let text = if flag { "yes" } else { "no" };
    text.to_string()
}
