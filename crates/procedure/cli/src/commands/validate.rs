//! `procedure validate`

use super::load_definition;
use crate::error::CliResult;
use crate::output::OutputFormat;
use clap::Args;
use colored::Colorize;
use procedure_engine::ProcedureDefinition;
use std::path::PathBuf;

/// Arguments for `validate`
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to a procedure definition (JSON)
    pub definition: PathBuf,
}

/// Execute `validate`
pub fn execute(args: ValidateArgs, format: OutputFormat) -> CliResult<()> {
    let definition = load_definition(&args.definition)?;
    print_summary(&definition, format)
}

fn print_summary(definition: &ProcedureDefinition, format: OutputFormat) -> CliResult<()> {
    let owners = definition.owner_names();
    let components = definition.components();

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "name": definition.name,
                "valid": true,
                "steps": definition.steps.len(),
                "owners": owners,
                "components": components,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Table => {
            println!(
                "{} {}",
                "✓".green(),
                format!("{} is valid", definition.name).bold()
            );
            println!("{}", "=".repeat(60));
            for step in &definition.steps {
                let ignored = if step.ignore { " (ignored)".dimmed().to_string() } else { String::new() };
                println!("  {:<16} {}{}", step.id.as_str(), step.kind(), ignored);
            }
            println!();
            let owners: Vec<&str> = owners.iter().map(|o| o.as_str()).collect();
            println!("  {}: {}", "Owners".bold(), owners.join(", "));
            if !components.is_empty() {
                let components: Vec<&str> = components.iter().map(String::as_str).collect();
                println!("  {}: {}", "Components".bold(), components.join(", "));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use procedure_engine::ProcedureError;
    use std::io::Write;

    fn write_definition(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_loads_a_valid_definition() {
        let file = write_definition(
            r#"{
                "name": "Intro",
                "steps": [
                    { "id": "s1" },
                    { "id": "s2", "target": { "kind": "dispatch", "component": "camera", "command": "pan" } }
                ]
            }"#,
        );
        let definition = load_definition(file.path()).unwrap();
        assert_eq!(definition.name.as_str(), "Intro");
        assert_eq!(definition.steps.len(), 2);

        let args = ValidateArgs {
            definition: file.path().to_path_buf(),
        };
        assert!(execute(args, OutputFormat::Json).is_ok());
    }

    #[test]
    fn test_rejects_duplicate_owners() {
        let file = write_definition(
            r#"{
                "name": "Intro",
                "steps": [
                    { "id": "s1", "target": { "kind": "delegate", "procedure": { "leaf": { "name": "Intro" } } } }
                ]
            }"#,
        );
        let err = load_definition(file.path()).unwrap_err();
        assert!(matches!(
            err,
            CliError::Procedure(ProcedureError::DuplicateOwner(_))
        ));
    }

    #[test]
    fn test_reports_malformed_json() {
        let file = write_definition("{ not json");
        let err = load_definition(file.path()).unwrap_err();
        assert!(matches!(err, CliError::Procedure(ProcedureError::Json(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_definition(std::path::Path::new("/nonexistent/intro.json")).unwrap_err();
        assert!(matches!(err, CliError::Io(_)));
    }
}
