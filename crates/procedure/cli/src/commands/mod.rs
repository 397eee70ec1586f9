//! CLI command implementations

pub mod run;
pub mod validate;

use crate::error::CliResult;
use procedure_engine::ProcedureDefinition;
use std::path::Path;

/// Read and validate a definition file
pub fn load_definition(path: &Path) -> CliResult<ProcedureDefinition> {
    let json = std::fs::read_to_string(path)?;
    Ok(ProcedureDefinition::from_json(&json)?)
}
