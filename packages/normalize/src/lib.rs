#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Address normalization and deduplication.
//!
//! Provider lists deliver the same physical address in many spellings:
//! - Abbreviated streets: `"Bahnhofstr. 5"` vs `"Bahnhofstrasse 5"`
//! - Umlaut variants: `"München"` vs `"Muenchen"`
//! - House number formatting: `"1 a"`, `"1-a"`, `"1_A"`
//!
//! This crate folds those variants into a deterministic
//! [`normalized_key`] used as the sole duplicate-detection identity,
//! consolidates duplicate records, and validates rows with
//! sibling-derived suggestions for missing fields.

use std::collections::HashMap;
use std::sync::LazyLock;

use address_pipeline_models::{NormalizedAddress, ValidationError};
use regex::Regex;

/// Delimiter joining the components of a normalized key. Stripped from
/// every component first, so it can never occur inside one.
pub const KEY_DELIMITER: &str = "|";

/// Ordered street abbreviation rules, first match wins.
///
/// Exactly one rule is applied per street, and [`Regex::replace`] only
/// substitutes its first occurrence. Real street names rarely contain
/// two abbreviation patterns, so later matches are left untouched.
static STREET_ABBREVIATIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)str\.", "strasse"),
        (r"(?i)straße", "strasse"),
        (r"(?i)strasse", "strasse"),
        (r"(?i)\bstr\b", "strasse"),
        (r"(?i)str$", "strasse"),
    ]
    .iter()
    .map(|&(pattern, replacement)| (Regex::new(pattern).expect("valid regex"), replacement))
    .collect()
});

/// Regex to collapse runs of whitespace into a single space.
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Regex for separators stripped from house numbers.
static HOUSE_NUMBER_SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-_]+").expect("valid regex"));

/// Regex for a valid German postal code: exactly five digits.
static POSTAL_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}$").expect("valid regex"));

/// Folds umlauts and ß to their ASCII digraphs and lowercases.
#[must_use]
pub fn normalize_umlauts(input: &str) -> String {
    input
        .to_lowercase()
        .replace('ä', "ae")
        .replace('ö', "oe")
        .replace('ü', "ue")
        .replace('ß', "ss")
}

/// Canonicalizes a street name for deduplication.
///
/// Expands the first matching abbreviation rule (and only that one),
/// folds umlauts, and collapses whitespace.
#[must_use]
pub fn normalize_street(street: &str) -> String {
    let street = street.trim();

    let expanded = STREET_ABBREVIATIONS
        .iter()
        .find(|(re, _)| re.is_match(street))
        .map_or_else(
            || street.to_string(),
            |(re, replacement)| re.replace(street, *replacement).into_owned(),
        );

    let folded = normalize_umlauts(&expanded);
    WHITESPACE_RE.replace_all(&folded, " ").trim().to_string()
}

/// Canonicalizes a house number: trims, lowercases, and strips internal
/// whitespace/hyphen/underscore separators. `"1 a"`, `"1-a"` and
/// `"1_A"` all collapse to `"1a"`. Idempotent.
#[must_use]
pub fn normalize_house_number(house_number: &str) -> String {
    HOUSE_NUMBER_SEPARATOR_RE
        .replace_all(house_number.trim(), "")
        .to_lowercase()
}

/// Builds the deduplication identity of an address.
///
/// A pure, deterministic function of (street, house number, postal code,
/// city) under the normalization rules above.
#[must_use]
pub fn normalized_key(street: &str, house_number: &str, postal_code: &str, city: &str) -> String {
    [
        normalize_street(street),
        normalize_house_number(house_number),
        postal_code.trim().to_string(),
        normalize_umlauts(city.trim()),
    ]
    .map(|component| component.replace(KEY_DELIMITER, ""))
    .join(KEY_DELIMITER)
}

/// `true` when `postal_code` is a well-formed five-digit code.
#[must_use]
pub fn is_valid_postal_code(postal_code: &str) -> bool {
    POSTAL_CODE_RE.is_match(postal_code.trim())
}

/// Consolidates duplicate records sharing a [`NormalizedAddress::normalized_key`].
///
/// For each group the first-seen record keeps all its fields; only
/// `we_count` is summed across duplicates. Output order is first-seen
/// order, output length equals the number of distinct keys, and the
/// total `we_count` is conserved.
#[must_use]
pub fn consolidate_addresses(addresses: Vec<NormalizedAddress>) -> Vec<NormalizedAddress> {
    let mut consolidated: Vec<NormalizedAddress> = Vec::new();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for address in addresses {
        if let Some(&idx) = index_by_key.get(&address.normalized_key) {
            consolidated[idx].we_count += address.we_count;
        } else {
            index_by_key.insert(address.normalized_key.clone(), consolidated.len());
            consolidated.push(address);
        }
    }

    consolidated
}

/// Validates a single address against required-field rules.
///
/// Missing postal codes and cities get a suggestion derived from sibling
/// records (see [`suggest_postal_code`] / [`suggest_city`]). Findings
/// are row-scoped and never block processing of other rows.
#[must_use]
pub fn validate_address(
    address: &NormalizedAddress,
    all_addresses: &[NormalizedAddress],
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if address.street.trim().is_empty() {
        errors.push(ValidationError {
            field: "street".to_string(),
            message: "Street is missing".to_string(),
            suggestion: None,
        });
    }

    if address.house_number.trim().is_empty() {
        errors.push(ValidationError {
            field: "houseNumber".to_string(),
            message: "House number is missing".to_string(),
            suggestion: None,
        });
    }

    if address.postal_code.trim().is_empty() {
        errors.push(ValidationError {
            field: "postalCode".to_string(),
            message: "Postal code is missing".to_string(),
            suggestion: suggest_postal_code(address, all_addresses),
        });
    } else if !is_valid_postal_code(&address.postal_code) {
        errors.push(ValidationError {
            field: "postalCode".to_string(),
            message: "Postal code must be exactly 5 digits".to_string(),
            suggestion: None,
        });
    }

    if address.city.trim().is_empty() {
        errors.push(ValidationError {
            field: "city".to_string(),
            message: "City is missing".to_string(),
            suggestion: suggest_city(address, all_addresses),
        });
    }

    errors
}

/// Proposes a postal code for `address` from sibling records sharing its
/// normalized street and city. Returns the most frequent sibling value;
/// ties break to the first-encountered maximum.
#[must_use]
pub fn suggest_postal_code(
    address: &NormalizedAddress,
    all_addresses: &[NormalizedAddress],
) -> Option<String> {
    let street = normalize_street(&address.street);
    let city = normalize_umlauts(address.city.trim());

    most_frequent(all_addresses.iter().filter_map(|sibling| {
        (normalize_street(&sibling.street) == street
            && normalize_umlauts(sibling.city.trim()) == city
            && is_valid_postal_code(&sibling.postal_code))
        .then(|| sibling.postal_code.trim().to_string())
    }))
}

/// Proposes a city for `address` from sibling records sharing its
/// normalized street and postal code. Same tie-breaking as
/// [`suggest_postal_code`].
#[must_use]
pub fn suggest_city(
    address: &NormalizedAddress,
    all_addresses: &[NormalizedAddress],
) -> Option<String> {
    let street = normalize_street(&address.street);
    let postal_code = address.postal_code.trim();

    most_frequent(all_addresses.iter().filter_map(|sibling| {
        (normalize_street(&sibling.street) == street
            && sibling.postal_code.trim() == postal_code
            && !sibling.city.trim().is_empty())
        .then(|| sibling.city.trim().to_string())
    }))
}

/// Returns the most frequent value, ties broken by first-encountered
/// maximum (a strictly-greater count is required to displace the
/// current winner).
fn most_frequent(values: impl Iterator<Item = String>) -> Option<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();

    for value in values {
        if let Some(entry) = counts.iter_mut().find(|(v, _)| *v == value) {
            entry.1 += 1;
        } else {
            counts.push((value, 1));
        }
    }

    let mut best: Option<(String, usize)> = None;
    for (value, count) in counts {
        if best.as_ref().is_none_or(|&(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }

    best.map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use address_pipeline_models::AddressStatus;

    fn address(street: &str, house: &str, postal: &str, city: &str, we: u32) -> NormalizedAddress {
        NormalizedAddress {
            street: street.to_string(),
            house_number: house.to_string(),
            postal_code: postal.to_string(),
            city: city.to_string(),
            locality: None,
            we_count: we,
            etage: None,
            lage: None,
            notiz_adresse: None,
            notiz_we: None,
            status: AddressStatus::New,
            normalized_key: normalized_key(street, house, postal, city),
        }
    }

    #[test]
    fn expands_str_abbreviation() {
        assert_eq!(normalize_street("Bahnhofstr."), "bahnhofstrasse");
        assert_eq!(normalize_street("Bahnhofstrasse"), "bahnhofstrasse");
        assert_eq!(normalize_street("Bahnhofstraße"), "bahnhofstrasse");
    }

    #[test]
    fn applies_only_one_substitution() {
        // Only the first occurrence of the first matching rule is
        // expanded; the second "Str." stays abbreviated.
        assert_eq!(
            normalize_street("Gartenstr. Ecke Hauptstr."),
            "gartenstrasse ecke hauptstr."
        );
    }

    #[test]
    fn folds_umlauts() {
        assert_eq!(normalize_umlauts("München"), "muenchen");
        assert_eq!(normalize_umlauts("GRÖSSE"), "groesse");
        assert_eq!(normalize_umlauts("Weißenfels"), "weissenfels");
    }

    #[test]
    fn house_number_variants_collapse() {
        assert_eq!(normalize_house_number("1 a"), "1a");
        assert_eq!(normalize_house_number("1-a"), "1a");
        assert_eq!(normalize_house_number("1_A"), "1a");
    }

    #[test]
    fn house_number_normalization_is_idempotent() {
        for input in ["1 a", "12-14", " 3_B ", "7"] {
            let once = normalize_house_number(input);
            assert_eq!(normalize_house_number(&once), once);
        }
    }

    #[test]
    fn key_is_insensitive_to_formatting_variants() {
        assert_eq!(
            normalized_key("Hauptstraße", "3 A", "12345", "München"),
            normalized_key("Hauptstrasse", "3a", "12345", "Muenchen")
        );
    }

    #[test]
    fn key_components_cannot_contain_delimiter() {
        let key = normalized_key("Haupt|straße", "3|a", "12|345", "Mün|chen");
        assert_eq!(key.matches(KEY_DELIMITER).count(), 3);
    }

    #[test]
    fn consolidates_duplicates_and_sums_we_count() {
        let input = vec![
            address("Bahnhofstr.", "5", "12345", "Berlin", 2),
            address("Bahnhofstrasse", "5", "12345", "Berlin", 3),
        ];
        let out = consolidate_addresses(input);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].we_count, 5);
        // First-seen record wins the remaining fields.
        assert_eq!(out[0].street, "Bahnhofstr.");
    }

    #[test]
    fn consolidation_conserves_totals() {
        let input = vec![
            address("Hauptstraße", "1", "10115", "Berlin", 4),
            address("Hauptstrasse", "1", "10115", "Berlin", 1),
            address("Hauptstraße", "2", "10115", "Berlin", 7),
            address("Gartenweg", "3", "80331", "München", 2),
        ];
        let total: u32 = input.iter().map(|a| a.we_count).sum();
        let distinct_keys = 3;

        let out = consolidate_addresses(input);
        assert_eq!(out.len(), distinct_keys);
        assert_eq!(out.iter().map(|a| a.we_count).sum::<u32>(), total);
    }

    #[test]
    fn validates_required_fields() {
        let addr = address("", "", "123", "", 1);
        let errors = validate_address(&addr, &[]);
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["street", "houseNumber", "postalCode", "city"]);
    }

    #[test]
    fn suggests_most_frequent_sibling_postal_code() {
        let siblings = vec![
            address("Hauptstraße", "1", "10115", "Berlin", 1),
            address("Hauptstrasse", "2", "10117", "Berlin", 1),
            address("Hauptstraße", "3", "10117", "Berlin", 1),
            address("Andere Str.", "4", "99999", "Berlin", 1),
        ];
        let missing = address("Hauptstraße", "5", "", "Berlin", 1);
        let errors = validate_address(&missing, &siblings);
        let postal_error = errors.iter().find(|e| e.field == "postalCode").unwrap();
        assert_eq!(postal_error.suggestion.as_deref(), Some("10117"));
    }

    #[test]
    fn postal_suggestion_ties_break_to_first_encountered() {
        let siblings = vec![
            address("Hauptstraße", "1", "10115", "Berlin", 1),
            address("Hauptstraße", "2", "10117", "Berlin", 1),
        ];
        let missing = address("Hauptstraße", "5", "", "Berlin", 1);
        assert_eq!(
            suggest_postal_code(&missing, &siblings).as_deref(),
            Some("10115")
        );
    }

    #[test]
    fn suggests_city_from_street_and_postal_siblings() {
        let siblings = vec![
            address("Hauptstraße", "1", "10115", "Berlin", 1),
            address("Hauptstraße", "2", "10115", "Berlin", 1),
            address("Hauptstraße", "3", "10115", "Potsdam", 1),
        ];
        let missing = address("Hauptstraße", "5", "10115", "", 1);
        assert_eq!(suggest_city(&missing, &siblings).as_deref(), Some("Berlin"));
    }

    #[test]
    fn invalid_postal_code_has_no_suggestion() {
        let addr = address("Hauptstraße", "1", "1234", "Berlin", 1);
        let errors = validate_address(&addr, &[]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "postalCode");
        assert!(errors[0].suggestion.is_none());
    }
}
