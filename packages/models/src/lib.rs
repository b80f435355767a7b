#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared data model for the address import pipeline.
//!
//! Column mappings, raw spreadsheet rows, normalized address records,
//! import list lifecycle, and the append-only failure log. All wire
//! names match the upstream JSON contract (`houseNumber`, `weCount`,
//! `failedAddresses`, ...).

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// The semantic meaning assigned to a spreadsheet column, independent of
/// its original header text.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SemanticField {
    /// Street name.
    Street,
    /// House number (possibly with a suffix like "12a").
    HouseNumber,
    /// Column holding house number and suffix combined with other text.
    HouseNumberCombined,
    /// Postal code (PLZ).
    PostalCode,
    /// City (Ort).
    City,
    /// Sub-locality / district (Ortsteil).
    Locality,
    /// Residential unit count (Wohneinheiten).
    UnitsResidential,
    /// Commercial unit count (Gewerbeeinheiten).
    UnitsCommercial,
    /// Combined unit count.
    UnitCount,
    /// Floor (Etage).
    Floor,
    /// Position within the floor (Lage).
    Position,
    /// Upstream customer number.
    CustomerNumber,
    /// Upstream customer name.
    CustomerName,
    /// Column recognized but irrelevant for the import.
    Ignore,
}

impl SemanticField {
    /// `true` for the `Ignore` pseudo-field, which may be shared by any
    /// number of headers.
    #[must_use]
    pub const fn is_ignore(self) -> bool {
        matches!(self, Self::Ignore)
    }
}

/// Ordered association from raw header text to [`SemanticField`].
///
/// Invariant: each non-`ignore` field is claimed by at most one header.
/// Serializes as a JSON object whose key order follows the original
/// column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    entries: Vec<(String, SemanticField)>,
}

impl ColumnMapping {
    /// Creates an empty mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts a header → field association.
    ///
    /// Returns `false` (without inserting) when `field` is a non-`ignore`
    /// field that is already claimed by another header, or when the
    /// header itself is already mapped.
    pub fn insert(&mut self, header: impl Into<String>, field: SemanticField) -> bool {
        let header = header.into();
        if self.field_for(&header).is_some() {
            return false;
        }
        if !field.is_ignore() && self.header_for(field).is_some() {
            return false;
        }
        self.entries.push((header, field));
        true
    }

    /// Looks up the field a header is mapped to.
    #[must_use]
    pub fn field_for(&self, header: &str) -> Option<SemanticField> {
        self.entries
            .iter()
            .find(|(h, _)| h == header)
            .map(|&(_, f)| f)
    }

    /// Looks up the header claiming a (non-`ignore`) field.
    #[must_use]
    pub fn header_for(&self, field: SemanticField) -> Option<&str> {
        self.entries
            .iter()
            .find(|&&(_, f)| f == field)
            .map(|(h, _)| h.as_str())
    }

    /// Iterates over `(header, field)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, SemanticField)> {
        self.entries.iter().map(|(h, f)| (h.as_str(), *f))
    }

    /// Number of mapped headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no header is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All mapped header strings, in column order.
    #[must_use]
    pub fn headers(&self) -> Vec<&str> {
        self.entries.iter().map(|(h, _)| h.as_str()).collect()
    }

    /// Returns the required-for-import fields that are not yet mapped:
    /// street, house number (plain or combined), postal code, and city
    /// must all be present before an import may proceed.
    #[must_use]
    pub fn missing_required(&self) -> Vec<SemanticField> {
        let mut missing = Vec::new();
        if self.header_for(SemanticField::Street).is_none() {
            missing.push(SemanticField::Street);
        }
        if self.header_for(SemanticField::HouseNumber).is_none()
            && self
                .header_for(SemanticField::HouseNumberCombined)
                .is_none()
        {
            missing.push(SemanticField::HouseNumber);
        }
        if self.header_for(SemanticField::PostalCode).is_none() {
            missing.push(SemanticField::PostalCode);
        }
        if self.header_for(SemanticField::City).is_none() {
            missing.push(SemanticField::City);
        }
        missing
    }
}

impl Serialize for ColumnMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (header, field) in &self.entries {
            map.serialize_entry(header, field)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ColumnMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MappingVisitor;

        impl<'de> Visitor<'de> for MappingVisitor {
            type Value = ColumnMapping;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of header to semantic field")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut mapping = ColumnMapping::new();
                while let Some((header, field)) = access.next_entry::<String, SemanticField>()? {
                    mapping.entries.push((header, field));
                }
                Ok(mapping)
            }
        }

        deserializer.deserialize_map(MappingVisitor)
    }
}

/// The intent behind a [`MappingQuestion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Column seems to hold house number and suffix combined.
    HouseNumberCombined,
    /// Column seems to count commercial units.
    CommercialUnits,
    /// Column seems to hold an upstream customer number.
    CustomerNumber,
    /// Column seems to hold an upstream customer name.
    CustomerName,
}

/// A confirmation question raised for an inherently ambiguous column
/// classification. The answer is required before the mapping may be
/// confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingQuestion {
    /// The raw header the question refers to.
    pub column: String,
    /// Human-readable question text.
    pub question: String,
    /// The semantic fields the user may choose between (wire names).
    pub options: Vec<String>,
    /// Question category.
    #[serde(rename = "type")]
    pub kind: QuestionKind,
}

/// A previously confirmed column mapping remembered per upstream data
/// provider, reused when its header set covers enough of a new upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedMapping {
    /// Identifier of the stored mapping.
    pub id: Uuid,
    /// Upstream provider this mapping belongs to.
    pub provider_id: String,
    /// The header set the mapping was confirmed for.
    pub headers: Vec<String>,
    /// The confirmed mapping itself.
    pub mapping: ColumnMapping,
    /// How many imports have reused this mapping.
    pub usage_count: i64,
}

/// One raw spreadsheet row: an ordered association from declared header
/// text to raw cell text. Serializes as a JSON object in column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    cells: Vec<(String, String)>,
}

impl RawRow {
    /// Creates an empty row.
    #[must_use]
    pub const fn new() -> Self {
        Self { cells: Vec::new() }
    }

    /// Appends a cell. Later duplicates of the same header are kept but
    /// never returned by [`Self::get`].
    pub fn push(&mut self, header: impl Into<String>, value: impl Into<String>) {
        self.cells.push((header.into(), value.into()));
    }

    /// Returns the trimmed cell text under `header`, if present and
    /// non-empty.
    #[must_use]
    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Iterates over `(header, cell)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells.iter().map(|(h, v)| (h.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for RawRow {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

impl Serialize for RawRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (header, value) in &self.cells {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RawRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = RawRow;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of header to cell text")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut row = RawRow::new();
                while let Some((header, value)) = access.next_entry::<String, String>()? {
                    row.cells.push((header, value));
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RowVisitor)
    }
}

/// Workflow status of a persisted address record.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AddressStatus {
    /// Freshly imported, not yet worked.
    #[default]
    New,
    /// Under active management.
    Active,
    /// No longer managed.
    Archived,
}

/// A canonical, deduplicated address record produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedAddress {
    /// Street name as delivered (canonicalization only happens in the
    /// normalized key).
    pub street: String,
    /// House number, possibly with suffix ("12a").
    pub house_number: String,
    /// Postal code.
    pub postal_code: String,
    /// City.
    pub city: String,
    /// Sub-locality, if delivered.
    pub locality: Option<String>,
    /// Unit count (Wohneinheiten).
    pub we_count: u32,
    /// Floor, if delivered.
    pub etage: Option<String>,
    /// Position within the floor, if delivered.
    pub lage: Option<String>,
    /// Free-form note on the address.
    pub notiz_adresse: Option<String>,
    /// Free-form note on the units.
    #[serde(rename = "notizWE")]
    pub notiz_we: Option<String>,
    /// Record workflow status.
    pub status: AddressStatus,
    /// Deduplication identity, see the normalize crate.
    pub normalized_key: String,
}

impl NormalizedAddress {
    /// One-line display form ("Bahnhofstr. 5, 12345 Berlin").
    #[must_use]
    pub fn display_line(&self) -> String {
        format!(
            "{} {}, {} {}",
            self.street, self.house_number, self.postal_code, self.city
        )
    }
}

/// A persisted address row: a [`NormalizedAddress`] plus storage identity
/// and optional resolved coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    /// Storage identifier.
    pub id: i64,
    /// The import list this record belongs to.
    pub list_id: Uuid,
    /// The address fields.
    #[serde(flatten)]
    pub address: NormalizedAddress,
    /// Resolved latitude, if geocoding succeeded.
    pub lat: Option<f64>,
    /// Resolved longitude, if geocoding succeeded.
    pub lng: Option<f64>,
}

/// A non-fatal, row-scoped validation finding. Never blocks sibling rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// The address field the finding refers to.
    pub field: String,
    /// Human-readable description.
    pub message: String,
    /// Proposed value, when one could be derived from sibling records.
    pub suggestion: Option<String>,
}

/// Import list lifecycle. Forward-only:
/// `pending → analyzing → mapping → importing → completed`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImportStatus {
    /// Uploaded, nothing processed yet.
    Pending,
    /// Column inference is running.
    Analyzing,
    /// Waiting for mapping confirmation.
    Mapping,
    /// Rows are being normalized, persisted, and geocoded.
    Importing,
    /// All addresses resolved or logged as unresolved. A list may be
    /// `completed` with a non-empty failure log (partial success is a
    /// valid terminal state).
    Completed,
}

impl ImportStatus {
    /// `true` when moving to `next` respects the forward-only state
    /// machine. Re-asserting the current status is allowed so terminal
    /// checks stay idempotent.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        next >= self
    }
}

/// Failure log entry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Row rejected or flagged during normalization/validation.
    Import,
    /// Address could not be resolved to coordinates.
    Geocoding,
}

/// One entry of the append-only per-list failure log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAddress {
    /// One-line form of the affected address.
    pub address: String,
    /// Why it failed.
    pub reason: String,
    /// Which pipeline stage produced the entry.
    #[serde(rename = "type")]
    pub kind: FailureKind,
}

/// The `error_details` document stored on an import list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Append-only accumulated failures.
    #[serde(rename = "failedAddresses", default)]
    pub failed_addresses: Vec<FailedAddress>,
}

/// Lifecycle record for one uploaded address list. Wire names are the
/// row's column names (`provider_id`, `error_details`, ...), with the
/// camelCase `failedAddresses` entries nested inside `error_details`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportList {
    /// List identifier.
    pub id: Uuid,
    /// Upstream data provider, when known.
    pub provider_id: Option<String>,
    /// Display name (usually the uploaded file name).
    pub name: String,
    /// Confirmed column mapping, once the mapping stage is done.
    pub column_mapping: Option<ColumnMapping>,
    /// Lifecycle status.
    pub status: ImportStatus,
    /// Accumulated import/geocoding failures.
    pub error_details: ErrorDetails,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_rejects_duplicate_field() {
        let mut mapping = ColumnMapping::new();
        assert!(mapping.insert("Straße", SemanticField::Street));
        assert!(!mapping.insert("Strasse 2", SemanticField::Street));
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn mapping_allows_shared_ignore() {
        let mut mapping = ColumnMapping::new();
        assert!(mapping.insert("Bundesland", SemanticField::Ignore));
        assert!(mapping.insert("Landkreis", SemanticField::Ignore));
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn mapping_missing_required() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("Straße", SemanticField::Street);
        mapping.insert("PLZ", SemanticField::PostalCode);
        assert_eq!(
            mapping.missing_required(),
            vec![SemanticField::HouseNumber, SemanticField::City]
        );
    }

    #[test]
    fn combined_house_number_satisfies_requirement() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("Straße", SemanticField::Street);
        mapping.insert("Adresse", SemanticField::HouseNumberCombined);
        mapping.insert("PLZ", SemanticField::PostalCode);
        mapping.insert("Ort", SemanticField::City);
        assert!(mapping.missing_required().is_empty());
    }

    #[test]
    fn mapping_serializes_in_column_order() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("Straße", SemanticField::Street);
        mapping.insert("Hausnummer", SemanticField::HouseNumber);
        let json = serde_json::to_string(&mapping).unwrap();
        assert_eq!(
            json,
            r#"{"Straße":"street","Hausnummer":"house_number"}"#
        );
    }

    #[test]
    fn mapping_roundtrips() {
        let mut mapping = ColumnMapping::new();
        mapping.insert("PLZ", SemanticField::PostalCode);
        mapping.insert("Ort", SemanticField::City);
        let json = serde_json::to_string(&mapping).unwrap();
        let back: ColumnMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mapping);
    }

    #[test]
    fn raw_row_get_trims_and_skips_empty() {
        let mut row = RawRow::new();
        row.push("Straße", " Hauptstraße ");
        row.push("Ort", "   ");
        assert_eq!(row.get("Straße"), Some("Hauptstraße"));
        assert_eq!(row.get("Ort"), None);
        assert_eq!(row.get("PLZ"), None);
    }

    #[test]
    fn status_transitions_are_forward_only() {
        assert!(ImportStatus::Pending.can_transition_to(ImportStatus::Analyzing));
        assert!(ImportStatus::Importing.can_transition_to(ImportStatus::Completed));
        assert!(ImportStatus::Completed.can_transition_to(ImportStatus::Completed));
        assert!(!ImportStatus::Completed.can_transition_to(ImportStatus::Importing));
        assert!(!ImportStatus::Mapping.can_transition_to(ImportStatus::Pending));
    }

    #[test]
    fn failed_address_wire_format() {
        let entry = FailedAddress {
            address: "Bahnhofstr. 5, 12345 Berlin".to_string(),
            reason: "not found".to_string(),
            kind: FailureKind::Geocoding,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "geocoding");
    }

    #[test]
    fn error_details_defaults_to_empty_log() {
        let details: ErrorDetails = serde_json::from_str("{}").unwrap();
        assert!(details.failed_addresses.is_empty());
    }
}
