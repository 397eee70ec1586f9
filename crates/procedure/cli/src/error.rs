//! CLI error types

use thiserror::Error;

/// CLI error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Procedure error: {0}")]
    Procedure(#[from] procedure_engine::ProcedureError),
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
