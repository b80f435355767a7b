#![allow(clippy::module_name_repetitions)]

//! Interactive TUI for the import tool.
//!
//! Menu-driven interface using `dialoguer` for running imports without
//! memorizing CLI flags, and for answering the mapping confirmation
//! questions the inference engine raises.

use std::path::PathBuf;
use std::sync::Arc;

use dialoguer::{Confirm, Input, Select};
use switchy_database::Database;
use uuid::Uuid;

use crate::AnalyzeResponse;
use address_pipeline_models::{ColumnMapping, SemanticField};

/// Top-level actions available in the interactive menu.
enum ImportAction {
    ImportFile,
    AnalyzeFile,
    GeocodeList,
    ListLists,
    RunMigrations,
}

impl ImportAction {
    const ALL: &[Self] = &[
        Self::ImportFile,
        Self::AnalyzeFile,
        Self::GeocodeList,
        Self::ListLists,
        Self::RunMigrations,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::ImportFile => "Import an address list",
            Self::AnalyzeFile => "Analyze a file's columns",
            Self::GeocodeList => "Geocode a list's missing coordinates",
            Self::ListLists => "Show import lists",
            Self::RunMigrations => "Run database migrations",
        }
    }
}

/// Runs the interactive menu loop.
///
/// # Errors
///
/// Returns an error if database connection, migrations, or the selected
/// operation fails.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let db: Arc<dyn Database> =
        Arc::from(address_pipeline_database::db::connect_from_env().await?);
    address_pipeline_database::run_migrations(db.as_ref()).await?;

    let labels: Vec<&str> = ImportAction::ALL.iter().map(ImportAction::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match ImportAction::ALL[idx] {
        ImportAction::ImportFile => {
            let path: String = Input::new().with_prompt("Path to CSV file").interact_text()?;
            let provider: String = Input::new()
                .with_prompt("Provider ID (empty for none)")
                .allow_empty(true)
                .interact_text()?;
            let provider = (!provider.trim().is_empty()).then(|| provider.trim().to_string());
            crate::run_import(db, &PathBuf::from(path), provider).await?;
        }
        ImportAction::AnalyzeFile => {
            let path: String = Input::new().with_prompt("Path to CSV file").interact_text()?;
            let (headers, rows) = crate::csv_file::read_csv(&PathBuf::from(path))?;
            let response = crate::analyze(
                db.as_ref(),
                &crate::AnalyzeRequest {
                    csv_headers: headers,
                    sample_rows: rows.into_iter().take(5).collect(),
                    provider_id: None,
                },
            )
            .await?;
            print_analysis(&response);
        }
        ImportAction::GeocodeList => {
            let id: String = Input::new().with_prompt("Import list ID").interact_text()?;
            let list_id = Uuid::parse_str(id.trim())?;
            crate::drive_geocoding(db, list_id).await?;
        }
        ImportAction::ListLists => {
            crate::print_lists(db.as_ref()).await?;
        }
        ImportAction::RunMigrations => {
            log::info!("Running database migrations...");
            address_pipeline_database::run_migrations(db.as_ref()).await?;
            log::info!("Migrations complete.");
        }
    }

    Ok(())
}

/// Prints an analysis result as a readable table.
pub fn print_analysis(response: &AnalyzeResponse) {
    println!(
        "Suggested mapping (confidence {:.0}%{}):",
        response.confidence * 100.0,
        if response.has_saved_mapping {
            ", from saved mapping"
        } else {
            ""
        }
    );
    for (header, field) in response.suggested_mapping.iter() {
        let example = response
            .example_data
            .get(header)
            .map(|v| format!("  (e.g. \"{v}\")"))
            .unwrap_or_default();
        println!("  {header:<30} -> {}{example}", field.as_ref());
    }
    if !response.unmapped_columns.is_empty() {
        println!("Unmapped columns: {}", response.unmapped_columns.join(", "));
    }
    for question in &response.questions {
        println!("Open question for '{}': {}", question.column, question.question);
    }
}

/// Walks the user through the analysis result: answers every open
/// question, then asks for final confirmation.
///
/// Returns `None` when the user declines the mapping.
///
/// # Errors
///
/// Returns an error if a prompt fails or an answer is not a known
/// semantic field.
pub fn confirm_mapping(
    response: &AnalyzeResponse,
) -> Result<Option<ColumnMapping>, Box<dyn std::error::Error>> {
    print_analysis(response);

    let mut mapping = response.suggested_mapping.clone();

    // Questions must be answered before the mapping may be confirmed.
    for question in &response.questions {
        let choice = Select::new()
            .with_prompt(&question.question)
            .items(&question.options)
            .default(0)
            .interact()?;
        let field: SemanticField = question.options[choice].parse()?;
        mapping = with_override(&mapping, &question.column, field);
    }

    let proceed = Confirm::new()
        .with_prompt("Import with this mapping?")
        .default(true)
        .interact()?;

    Ok(proceed.then_some(mapping))
}

/// Rebuilds a mapping with one column's field replaced.
fn with_override(mapping: &ColumnMapping, column: &str, field: SemanticField) -> ColumnMapping {
    let mut rebuilt = ColumnMapping::new();
    for (header, existing) in mapping.iter() {
        let target = if header == column { field } else { existing };
        if !rebuilt.insert(header, target) {
            log::warn!("Dropping header '{header}': field {target} already claimed");
        }
    }
    rebuilt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_replaces_single_column() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("GE", SemanticField::UnitsCommercial);
        mapping.insert("Straße", SemanticField::Street);

        let rebuilt = with_override(&mapping, "GE", SemanticField::Ignore);
        assert_eq!(rebuilt.field_for("GE"), Some(SemanticField::Ignore));
        assert_eq!(rebuilt.field_for("Straße"), Some(SemanticField::Street));
    }
}
