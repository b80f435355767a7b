#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Import pipeline for uploaded address lists.
//!
//! Ties the stages together: column mapping analysis (with saved-mapping
//! reuse), row normalization and consolidation, persistence, and the
//! resumable batch geocoder with its continuation queue.

pub mod csv_file;
pub mod geocode;
pub mod interactive;
pub mod queue;
pub mod store;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use address_pipeline_database::{DbError, queries};
use address_pipeline_geocoder::GeocodeError;
use address_pipeline_mapping::{MappingAnalysis, infer_mapping, saved_mapping_applies};
use address_pipeline_models::{
    AddressStatus, ColumnMapping, FailedAddress, FailureKind, ImportStatus, MappingQuestion,
    NormalizedAddress, RawRow, SemanticField,
};
use address_pipeline_normalize::{consolidate_addresses, normalized_key, validate_address};
use regex::Regex;
use serde::{Deserialize, Serialize};
use switchy_database::Database;
use uuid::Uuid;

/// Errors from pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// A required request field is missing or invalid. Rejected
    /// immediately, no retry.
    #[error("Invalid input: {message}")]
    Input {
        /// Description of the rejected input.
        message: String,
    },

    /// Database failure. Safe to retry a whole batch step since work
    /// selection is idempotent.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Geocoding failure that escaped the per-address handling.
    #[error("Geocoding error: {0}")]
    Geocode(#[from] GeocodeError),

    /// CSV parsing failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request for a column mapping analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// Ordered header strings from the uploaded file.
    pub csv_headers: Vec<String>,
    /// A small sample of data rows for example values.
    #[serde(default)]
    pub sample_rows: Vec<RawRow>,
    /// Upstream provider identity, enabling saved-mapping reuse.
    #[serde(default)]
    pub provider_id: Option<String>,
}

/// Response of a column mapping analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    /// Header → semantic field suggestions.
    pub suggested_mapping: ColumnMapping,
    /// Classification confidence in `[0, 1]`.
    pub confidence: f64,
    /// Whether a saved mapping was reused verbatim.
    pub has_saved_mapping: bool,
    /// The reused saved mapping's ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_mapping_id: Option<Uuid>,
    /// Headers that could not be classified.
    pub unmapped_columns: Vec<String>,
    /// Confirmation questions for ambiguous columns.
    pub questions: Vec<MappingQuestion>,
    /// First non-empty sample cell per header.
    pub example_data: BTreeMap<String, String>,
}

/// Analyzes uploaded headers, preferring a saved provider mapping.
///
/// When the provider's most-used saved mapping covers at least 80% of
/// the current headers it is returned verbatim with confidence 0.95 and
/// heuristic classification is skipped entirely; its usage counter is
/// bumped. Otherwise the headers run through the rule table.
///
/// # Errors
///
/// Returns [`ImportError`] if a saved-mapping lookup fails.
pub async fn analyze(
    db: &dyn Database,
    request: &AnalyzeRequest,
) -> Result<AnalyzeResponse, ImportError> {
    if let Some(provider_id) = request.provider_id.as_deref() {
        if let Some(saved) = queries::get_most_used_saved_mapping(db, provider_id).await? {
            if saved_mapping_applies(&saved, &request.csv_headers) {
                log::info!(
                    "Reusing saved mapping {} for provider '{provider_id}' (used {} times)",
                    saved.id,
                    saved.usage_count
                );
                queries::increment_saved_mapping_usage(db, saved.id).await?;

                let unmapped_columns: Vec<String> = request
                    .csv_headers
                    .iter()
                    .filter(|h| saved.mapping.field_for(h).is_none())
                    .cloned()
                    .collect();

                let MappingAnalysis { example_data, .. } =
                    infer_mapping(&request.csv_headers, &request.sample_rows);

                return Ok(AnalyzeResponse {
                    suggested_mapping: saved.mapping,
                    confidence: address_pipeline_mapping::SAVED_MAPPING_CONFIDENCE,
                    has_saved_mapping: true,
                    saved_mapping_id: Some(saved.id),
                    unmapped_columns,
                    questions: Vec::new(),
                    example_data,
                });
            }
        }
    }

    let analysis = infer_mapping(&request.csv_headers, &request.sample_rows);

    Ok(AnalyzeResponse {
        suggested_mapping: analysis.suggested_mapping,
        confidence: analysis.confidence,
        has_saved_mapping: false,
        saved_mapping_id: None,
        unmapped_columns: analysis.unmapped_columns,
        questions: analysis.questions,
        example_data: analysis.example_data,
    })
}

/// Summary of a completed row import.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    /// Rows received from the file.
    pub total_rows: usize,
    /// Consolidated records persisted.
    pub imported: usize,
    /// Rows rejected by validation (logged, never blocking siblings).
    pub rejected: usize,
    /// Duplicate rows merged into an existing record.
    pub duplicates_merged: usize,
}

/// Imports confirmed rows into an existing list.
///
/// Applies the confirmed mapping to every row, validates each record
/// against its siblings (rejected rows are logged as `import` failures
/// with suggestions and never block the rest), consolidates duplicates,
/// persists the records without coordinates, remembers the mapping for
/// the provider, and hands the list to the geocoding queue.
///
/// # Errors
///
/// Returns [`ImportError::Input`] when required fields are unmapped,
/// [`DbError::NotFound`] (wrapped) when the list does not exist, or any
/// database error.
pub async fn import_rows(
    db: &dyn Database,
    geocode_queue: Option<&queue::GeocodeQueue>,
    list_id: Uuid,
    mapping: &ColumnMapping,
    rows: &[RawRow],
) -> Result<ImportSummary, ImportError> {
    let missing = mapping.missing_required();
    if !missing.is_empty() {
        let fields: Vec<&str> = missing.iter().map(AsRef::as_ref).collect();
        return Err(ImportError::Input {
            message: format!("Required fields not mapped: {}", fields.join(", ")),
        });
    }

    let list = queries::get_import_list(db, list_id).await?;

    queries::set_column_mapping(db, list_id, mapping).await?;
    queries::update_list_status(db, list_id, ImportStatus::Importing).await?;

    let candidates: Vec<NormalizedAddress> =
        rows.iter().map(|row| apply_mapping(row, mapping)).collect();

    let mut failures: Vec<FailedAddress> = Vec::new();
    let mut valid: Vec<NormalizedAddress> = Vec::new();

    for candidate in &candidates {
        let errors = validate_address(candidate, &candidates);
        if errors.is_empty() {
            valid.push(candidate.clone());
        } else {
            for error in errors {
                let reason = error.suggestion.as_ref().map_or_else(
                    || error.message.clone(),
                    |suggestion| format!("{} (suggested: {suggestion})", error.message),
                );
                failures.push(FailedAddress {
                    address: candidate.display_line(),
                    reason,
                    kind: FailureKind::Import,
                });
            }
        }
    }

    let valid_count = valid.len();
    let consolidated = consolidate_addresses(valid);
    let imported = consolidated.len();

    queries::insert_addresses(db, list_id, &consolidated).await?;
    queries::append_failed_addresses(db, list_id, &failures).await?;

    if let Some(provider_id) = list.provider_id.as_deref() {
        let headers: Vec<String> = mapping.headers().iter().map(ToString::to_string).collect();
        let saved_id = queries::upsert_saved_mapping(db, provider_id, &headers, mapping).await?;
        log::info!("Remembered mapping {saved_id} for provider '{provider_id}'");
    }

    log::info!(
        "List {list_id}: imported {imported} records from {} rows ({} rejected, {} duplicates merged)",
        rows.len(),
        rows.len() - valid_count,
        valid_count - imported,
    );

    if let Some(geocode_queue) = geocode_queue {
        geocode_queue.enqueue(list_id);
    }

    Ok(ImportSummary {
        total_rows: rows.len(),
        imported,
        rejected: rows.len() - valid_count,
        duplicates_merged: valid_count - imported,
    })
}

/// Builds the shared HTTP client with the pipeline's user agent.
///
/// # Errors
///
/// Returns an error if the TLS backend fails to initialize.
pub fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("address-pipeline/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// End-to-end CLI import: parses the file, runs the mapping analysis,
/// confirms the mapping interactively (including open questions),
/// imports the rows, and drives geocoding to completion.
///
/// # Errors
///
/// Returns an error if any pipeline stage fails.
pub async fn run_import(
    db: Arc<dyn Database>,
    path: &Path,
    provider_id: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = path
        .file_name()
        .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().to_string());
    let (headers, rows) = csv_file::read_csv(path)?;
    log::info!("Read {} rows with {} columns from {name}", rows.len(), headers.len());

    let list_id = Uuid::new_v4();
    queries::create_import_list(db.as_ref(), list_id, provider_id.as_deref(), &name).await?;
    queries::update_list_status(db.as_ref(), list_id, ImportStatus::Analyzing).await?;

    let response = analyze(
        db.as_ref(),
        &AnalyzeRequest {
            csv_headers: headers,
            sample_rows: rows.iter().take(5).cloned().collect(),
            provider_id,
        },
    )
    .await?;

    queries::update_list_status(db.as_ref(), list_id, ImportStatus::Mapping).await?;

    let Some(mapping) = interactive::confirm_mapping(&response)? else {
        log::info!("Import aborted; list {list_id} stays in the mapping stage");
        return Ok(());
    };

    let summary = import_rows(db.as_ref(), None, list_id, &mapping, &rows).await?;
    log::info!(
        "List {list_id}: {} records imported, {} rejected, {} duplicates merged",
        summary.imported,
        summary.rejected,
        summary.duplicates_merged
    );

    drive_geocoding(db, list_id).await
}

/// Drives batch geocoding steps for a list until none remain.
///
/// # Errors
///
/// Returns an error if a batch step fails.
pub async fn drive_geocoding(
    db: Arc<dyn Database>,
    list_id: Uuid,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = store::DbImportStore::new(db);
    let resolver = geocode::TieredResolver::new(http_client()?);

    loop {
        let outcome = geocode::geocode_step(&store, &resolver, None, list_id).await?;
        log::info!("{}", outcome.message);
        if outcome.remaining == Some(0) {
            break;
        }
    }

    Ok(())
}

/// Prints all import lists as a table.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn print_lists(db: &dyn Database) -> Result<(), Box<dyn std::error::Error>> {
    let lists = queries::list_import_lists(db).await?;

    println!("{:<38} {:<12} {:>7} NAME", "ID", "STATUS", "ERRORS");
    println!("{}", "-".repeat(80));
    for list in &lists {
        println!(
            "{:<38} {:<12} {:>7} {}",
            list.id,
            list.status.to_string(),
            list.error_details.failed_addresses.len(),
            list.name
        );
    }

    Ok(())
}

/// Regex extracting the numeric part and optional suffix from a
/// combined house-number cell ("12 a", "Nr. 12a", "12-14").
static COMBINED_HOUSE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\s*[-/]?\s*\d*\s*[a-zA-Z]?)\s*$").expect("valid regex"));

/// Extracts the house number from a combined house-number+suffix cell.
#[must_use]
pub fn split_combined_house_number(value: &str) -> String {
    COMBINED_HOUSE_NUMBER_RE
        .captures(value.trim())
        .and_then(|caps| caps.get(1))
        .map_or_else(|| value.trim().to_string(), |m| m.as_str().to_string())
}

/// Builds a [`NormalizedAddress`] from a raw row under a confirmed
/// mapping. Missing cells become empty strings (caught by validation);
/// unit counts default to 1 when no unit column is mapped.
#[must_use]
pub fn apply_mapping(row: &RawRow, mapping: &ColumnMapping) -> NormalizedAddress {
    let cell = |field: SemanticField| -> Option<String> {
        mapping
            .header_for(field)
            .and_then(|header| row.get(header))
            .map(ToString::to_string)
    };

    let street = cell(SemanticField::Street).unwrap_or_default();
    let house_number = cell(SemanticField::HouseNumber).unwrap_or_else(|| {
        cell(SemanticField::HouseNumberCombined)
            .map(|v| split_combined_house_number(&v))
            .unwrap_or_default()
    });
    let postal_code = cell(SemanticField::PostalCode).unwrap_or_default();
    let city = cell(SemanticField::City).unwrap_or_default();

    let parse_count =
        |value: Option<String>| -> Option<u32> { value.and_then(|v| v.trim().parse().ok()) };

    // An explicit total wins; otherwise residential and (confirmed)
    // commercial counts are summed. Lists without any unit column count
    // one unit per row.
    let we_count = parse_count(cell(SemanticField::UnitCount)).unwrap_or_else(|| {
        let residential = parse_count(cell(SemanticField::UnitsResidential));
        let commercial = parse_count(cell(SemanticField::UnitsCommercial));
        match (residential, commercial) {
            (None, None) => 1,
            (r, c) => r.unwrap_or(0) + c.unwrap_or(0),
        }
    });

    let customer_note = match (
        cell(SemanticField::CustomerName),
        cell(SemanticField::CustomerNumber),
    ) {
        (Some(name), Some(number)) => Some(format!("Kunde: {name} ({number})")),
        (Some(name), None) => Some(format!("Kunde: {name}")),
        (None, Some(number)) => Some(format!("Kundennummer: {number}")),
        (None, None) => None,
    };

    NormalizedAddress {
        normalized_key: normalized_key(&street, &house_number, &postal_code, &city),
        street,
        house_number,
        postal_code,
        city,
        locality: cell(SemanticField::Locality),
        we_count,
        etage: cell(SemanticField::Floor),
        lage: cell(SemanticField::Position),
        notiz_adresse: customer_note,
        notiz_we: None,
        status: AddressStatus::New,
    }
}
