#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Column mapping inference for uploaded address lists.
//!
//! Classifies raw column headers into [`SemanticField`]s against an
//! ordered, data-driven rule table — first matching rule wins, headers
//! matching no rule stay unmapped. Inherently ambiguous classifications
//! (combined house numbers, commercial units, customer identifiers)
//! additionally raise a [`MappingQuestion`] that must be answered before
//! the mapping is confirmed.
//!
//! A previously confirmed [`SavedMapping`] short-circuits the heuristics
//! entirely when it covers enough of the current header set (see
//! [`saved_mapping_applies`]).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use address_pipeline_models::{
    ColumnMapping, MappingQuestion, QuestionKind, RawRow, SavedMapping, SemanticField,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Minimum fraction of current headers a saved mapping must cover to be
/// reused verbatim.
pub const SAVED_MAPPING_MATCH_THRESHOLD: f64 = 0.80;

/// Fixed confidence reported when a saved mapping is reused.
pub const SAVED_MAPPING_CONFIDENCE: f64 = 0.95;

/// One classification rule: a case-insensitive header pattern, the
/// semantic field it assigns, and an optional confirmation question.
struct MappingRule {
    pattern: Regex,
    field: SemanticField,
    question: Option<QuestionKind>,
}

impl MappingRule {
    fn new(pattern: &str, field: SemanticField, question: Option<QuestionKind>) -> Self {
        Self {
            pattern: Regex::new(&format!("(?i){pattern}")).expect("valid regex"),
            field,
            question,
        }
    }
}

/// The ordered rule table. Evaluation order is priority order: the
/// first rule whose pattern matches a header wins, so more specific
/// patterns (combined house number, unit variants) come before the
/// generic ones they would otherwise shadow.
static MAPPING_RULES: LazyLock<Vec<MappingRule>> = LazyLock::new(|| {
    use SemanticField as F;

    vec![
        MappingRule::new(
            r"(haus)?\s*-?\s*(nr|nummer)\.?\s*(\+|/|&|und|mit|inkl\.?)\s*(zusatz|suffix)|hausnummer\s*komplett",
            F::HouseNumberCombined,
            Some(QuestionKind::HouseNumberCombined),
        ),
        MappingRule::new(
            r"^\s*(haus\s*-?\s*(nr|nummer)\.?|h(aus)?nr\.?|nr\.?|house\s*(no|number)\.?)\s*$",
            F::HouseNumber,
            None,
        ),
        MappingRule::new(r"^\s*plz\s*$|postleitzahl|postal\s*code|^\s*zip", F::PostalCode, None),
        MappingRule::new(r"^\s*(ort|stadt|city|wohnort)\s*$", F::City, None),
        MappingRule::new(r"ortsteil|stadtteil|ortschaft|locality", F::Locality, None),
        MappingRule::new(r"stra(ß|ss)e|^\s*str\.?\s*$|street", F::Street, None),
        MappingRule::new(
            r"^\s*we\s*$|wohneinheit|anzahl\s*we|we[\s-]?anzahl|wohnungen",
            F::UnitsResidential,
            None,
        ),
        MappingRule::new(
            r"^\s*ge\s*$|gewerbeeinheit|gewerbe",
            F::UnitsCommercial,
            Some(QuestionKind::CommercialUnits),
        ),
        MappingRule::new(r"einheiten|^\s*anzahl\s*$|units", F::UnitCount, None),
        MappingRule::new(
            r"etage|stockwerk|geschoss|floor|^\s*[oe]g\s*$",
            F::Floor,
            None,
        ),
        MappingRule::new(r"^\s*lage\s*$|lage\s*im|wohnungslage|position", F::Position, None),
        MappingRule::new(
            r"kunden\s*-?\s*(nr|nummer)|^\s*kd\.?\s*-?\s*nr\.?\s*$|debitor|vertrags\s*-?\s*(nr|nummer)|customer\s*(no|number)",
            F::CustomerNumber,
            Some(QuestionKind::CustomerNumber),
        ),
        MappingRule::new(
            r"kunden?\s*-?\s*name|eigent(ü|ue)mer|verwalter|hausverwaltung|^\s*name\s*$",
            F::CustomerName,
            Some(QuestionKind::CustomerName),
        ),
        MappingRule::new(
            r"bundesland|landkreis|kreis|regierungsbezirk|bezirk|region|^\s*land\s*$|staat|country",
            F::Ignore,
            None,
        ),
    ]
});

/// Result of a column mapping inference run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingAnalysis {
    /// Header → semantic field suggestions, in column order.
    pub suggested_mapping: ColumnMapping,
    /// Fraction of headers that were classified (`Ignore` counts,
    /// unmapped does not).
    pub confidence: f64,
    /// Headers no rule matched, or whose target field was already
    /// claimed by an earlier column.
    pub unmapped_columns: Vec<String>,
    /// Confirmation questions for ambiguous classifications.
    pub questions: Vec<MappingQuestion>,
    /// First non-empty sample cell per header.
    pub example_data: BTreeMap<String, String>,
}

/// Classifies a single header against the rule table.
///
/// Returns the winning rule's field and optional question kind, or
/// `None` when no rule matches.
#[must_use]
pub fn classify_header(header: &str) -> Option<(SemanticField, Option<QuestionKind>)> {
    MAPPING_RULES
        .iter()
        .find(|rule| rule.pattern.is_match(header))
        .map(|rule| (rule.field, rule.question))
}

/// Infers a column mapping for the given headers.
///
/// Headers are classified independently in column order. A header whose
/// rule targets a non-`ignore` field already claimed by an earlier
/// column is left unmapped rather than violating the one-header-per-field
/// invariant. An empty header list yields an empty mapping with
/// confidence 0.
#[must_use]
pub fn infer_mapping(headers: &[String], sample_rows: &[RawRow]) -> MappingAnalysis {
    let mut mapping = ColumnMapping::new();
    let mut unmapped_columns = Vec::new();
    let mut questions = Vec::new();

    for header in headers {
        match classify_header(header) {
            Some((field, question)) => {
                if mapping.insert(header.clone(), field) {
                    if let Some(kind) = question {
                        questions.push(question_for(kind, header));
                    }
                } else {
                    log::debug!("Header '{header}' maps to already-claimed field {field}");
                    unmapped_columns.push(header.clone());
                }
            }
            None => unmapped_columns.push(header.clone()),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let confidence = if headers.is_empty() {
        0.0
    } else {
        mapping.len() as f64 / headers.len() as f64
    };

    MappingAnalysis {
        suggested_mapping: mapping,
        confidence,
        unmapped_columns,
        questions,
        example_data: example_data(headers, sample_rows),
    }
}

/// Collects the first non-empty sample cell per header.
fn example_data(headers: &[String], sample_rows: &[RawRow]) -> BTreeMap<String, String> {
    let mut examples = BTreeMap::new();
    for header in headers {
        if let Some(value) = sample_rows.iter().find_map(|row| row.get(header)) {
            examples.insert(header.clone(), value.to_string());
        }
    }
    examples
}

/// Fraction of `current_headers` present in `saved_headers`.
#[must_use]
pub fn match_fraction(saved_headers: &[String], current_headers: &[String]) -> f64 {
    if current_headers.is_empty() {
        return 0.0;
    }

    let saved: BTreeSet<&str> = saved_headers.iter().map(String::as_str).collect();
    let matching = current_headers
        .iter()
        .filter(|h| saved.contains(h.as_str()))
        .count();

    #[allow(clippy::cast_precision_loss)]
    {
        matching as f64 / current_headers.len() as f64
    }
}

/// `true` when a saved mapping covers enough of the current headers to
/// be reused verbatim, skipping heuristic classification entirely.
#[must_use]
pub fn saved_mapping_applies(saved: &SavedMapping, current_headers: &[String]) -> bool {
    match_fraction(&saved.headers, current_headers) >= SAVED_MAPPING_MATCH_THRESHOLD
}

/// Builds the confirmation question for an ambiguous classification.
#[must_use]
pub fn question_for(kind: QuestionKind, column: &str) -> MappingQuestion {
    let (question, options) = match kind {
        QuestionKind::HouseNumberCombined => (
            format!(
                "Does column '{column}' contain the house number together with its suffix (e.g. \"12a\")?"
            ),
            vec![
                SemanticField::HouseNumberCombined,
                SemanticField::HouseNumber,
                SemanticField::Ignore,
            ],
        ),
        QuestionKind::CommercialUnits => (
            format!("Does column '{column}' count commercial units (Gewerbeeinheiten)?"),
            vec![
                SemanticField::UnitsCommercial,
                SemanticField::UnitCount,
                SemanticField::Ignore,
            ],
        ),
        QuestionKind::CustomerNumber => (
            format!("Does column '{column}' contain your customer number for this provider?"),
            vec![SemanticField::CustomerNumber, SemanticField::Ignore],
        ),
        QuestionKind::CustomerName => (
            format!("Does column '{column}' contain the customer name?"),
            vec![SemanticField::CustomerName, SemanticField::Ignore],
        ),
    };

    MappingQuestion {
        column: column.to_string(),
        question,
        options: options.iter().map(|f| f.as_ref().to_string()).collect(),
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn maps_standard_german_headers_with_full_confidence() {
        let analysis = infer_mapping(&headers(&["Straße", "Hausnummer", "PLZ", "Ort"]), &[]);

        assert_eq!(
            analysis.suggested_mapping.field_for("Straße"),
            Some(SemanticField::Street)
        );
        assert_eq!(
            analysis.suggested_mapping.field_for("Hausnummer"),
            Some(SemanticField::HouseNumber)
        );
        assert_eq!(
            analysis.suggested_mapping.field_for("PLZ"),
            Some(SemanticField::PostalCode)
        );
        assert_eq!(
            analysis.suggested_mapping.field_for("Ort"),
            Some(SemanticField::City)
        );
        assert!((analysis.confidence - 1.0).abs() < f64::EPSILON);
        assert!(analysis.unmapped_columns.is_empty());
        assert!(analysis.questions.is_empty());
    }

    #[test]
    fn classifies_individual_headers() {
        let cases = [
            ("Str.", SemanticField::Street),
            ("Strasse", SemanticField::Street),
            ("Hausnr.", SemanticField::HouseNumber),
            ("Nr", SemanticField::HouseNumber),
            ("Postleitzahl", SemanticField::PostalCode),
            ("Stadt", SemanticField::City),
            ("Ortsteil", SemanticField::Locality),
            ("WE", SemanticField::UnitsResidential),
            ("Wohneinheiten", SemanticField::UnitsResidential),
            ("Gewerbeeinheiten", SemanticField::UnitsCommercial),
            ("Anzahl Einheiten", SemanticField::UnitCount),
            ("Etage", SemanticField::Floor),
            ("Lage", SemanticField::Position),
            ("Kundennummer", SemanticField::CustomerNumber),
            ("Kundenname", SemanticField::CustomerName),
            ("Bundesland", SemanticField::Ignore),
            ("Landkreis", SemanticField::Ignore),
        ];

        for (header, expected) in cases {
            let (field, _) = classify_header(header)
                .unwrap_or_else(|| panic!("Header '{header}' should classify"));
            assert_eq!(field, expected, "Header '{header}'");
        }
    }

    #[test]
    fn unknown_header_is_unmapped() {
        assert!(classify_header("Frobnitz").is_none());

        let analysis = infer_mapping(&headers(&["Straße", "Frobnitz"]), &[]);
        assert_eq!(analysis.unmapped_columns, vec!["Frobnitz".to_string()]);
        assert!((analysis.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn ignore_counts_toward_confidence() {
        let analysis = infer_mapping(
            &headers(&["Straße", "Hausnummer", "PLZ", "Ort", "Bundesland"]),
            &[],
        );
        assert_eq!(
            analysis.suggested_mapping.field_for("Bundesland"),
            Some(SemanticField::Ignore)
        );
        assert!((analysis.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn duplicate_field_target_leaves_later_header_unmapped() {
        let analysis = infer_mapping(&headers(&["Straße", "Strasse (alt)"]), &[]);
        assert_eq!(
            analysis.suggested_mapping.field_for("Straße"),
            Some(SemanticField::Street)
        );
        assert_eq!(
            analysis.unmapped_columns,
            vec!["Strasse (alt)".to_string()]
        );
    }

    #[test]
    fn empty_headers_yield_zero_confidence() {
        let analysis = infer_mapping(&[], &[]);
        assert!(analysis.suggested_mapping.is_empty());
        assert!((analysis.confidence - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ambiguous_columns_raise_questions() {
        let analysis = infer_mapping(
            &headers(&["Straße", "Hausnr. + Zusatz", "Gewerbeeinheiten", "Kundennummer"]),
            &[],
        );

        let kinds: Vec<QuestionKind> = analysis.questions.iter().map(|q| q.kind).collect();
        assert_eq!(
            kinds,
            vec![
                QuestionKind::HouseNumberCombined,
                QuestionKind::CommercialUnits,
                QuestionKind::CustomerNumber,
            ]
        );
        assert_eq!(
            analysis.suggested_mapping.field_for("Hausnr. + Zusatz"),
            Some(SemanticField::HouseNumberCombined)
        );
    }

    #[test]
    fn question_options_are_wire_names() {
        let question = question_for(QuestionKind::CommercialUnits, "GE");
        assert_eq!(
            question.options,
            vec!["units_commercial", "unit_count", "ignore"]
        );
    }

    #[test]
    fn example_data_takes_first_non_empty_cell() {
        let hdrs = headers(&["Straße", "Ort"]);
        let rows = vec![
            [("Straße", ""), ("Ort", "Berlin")]
                .into_iter()
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect::<RawRow>(),
            [("Straße", "Hauptstraße"), ("Ort", "Potsdam")]
                .into_iter()
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect::<RawRow>(),
        ];

        let analysis = infer_mapping(&hdrs, &rows);
        assert_eq!(
            analysis.example_data.get("Straße").map(String::as_str),
            Some("Hauptstraße")
        );
        assert_eq!(
            analysis.example_data.get("Ort").map(String::as_str),
            Some("Berlin")
        );
    }

    #[test]
    fn saved_mapping_applies_at_80_percent_overlap() {
        let current: Vec<String> = (0..10).map(|i| format!("col{i}")).collect();
        let mut saved_headers: Vec<String> = current[..9].to_vec();
        saved_headers.push("something else".to_string());

        let saved = SavedMapping {
            id: Uuid::nil(),
            provider_id: "provider-a".to_string(),
            headers: saved_headers,
            mapping: ColumnMapping::new(),
            usage_count: 3,
        };

        assert!((match_fraction(&saved.headers, &current) - 0.9).abs() < f64::EPSILON);
        assert!(saved_mapping_applies(&saved, &current));
    }

    #[test]
    fn saved_mapping_below_threshold_does_not_apply() {
        let current: Vec<String> = (0..10).map(|i| format!("col{i}")).collect();
        let saved = SavedMapping {
            id: Uuid::nil(),
            provider_id: "provider-a".to_string(),
            headers: current[..7].to_vec(),
            mapping: ColumnMapping::new(),
            usage_count: 1,
        };

        assert!(!saved_mapping_applies(&saved, &current));
    }
}
