//! CSV file adapter.
//!
//! The pipeline itself is format-agnostic (it consumes headers plus
//! header→cell rows); this module is the concrete tabular-file
//! collaborator used by the CLI. German provider exports commonly use
//! `;` as the delimiter, so it is sniffed from the header line.

use std::path::Path;

use address_pipeline_models::RawRow;

use crate::ImportError;

/// Reads headers and rows from a CSV file.
///
/// # Errors
///
/// Returns [`ImportError`] if the file cannot be read or parsed.
pub fn read_csv(path: &Path) -> Result<(Vec<String>, Vec<RawRow>), ImportError> {
    let content = std::fs::read_to_string(path)?;
    parse_csv(&content)
}

/// Parses CSV content into headers and rows.
///
/// # Errors
///
/// Returns [`ImportError`] if the content is not valid CSV.
pub fn parse_csv(content: &str) -> Result<(Vec<String>, Vec<RawRow>), ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(content))
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: RawRow = headers
            .iter()
            .cloned()
            .zip(record.iter().map(ToString::to_string))
            .collect();
        rows.push(row);
    }

    Ok((headers, rows))
}

/// Picks `;` or `,` based on which occurs more often in the header line.
fn sniff_delimiter(content: &str) -> u8 {
    let header_line = content.lines().next().unwrap_or_default();
    if header_line.matches(';').count() > header_line.matches(',').count() {
        b';'
    } else {
        b','
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_semicolon_delimited_export() {
        let content = "Straße;Hausnummer;PLZ;Ort\nHauptstraße;3a;12345;Berlin\n";
        let (headers, rows) = parse_csv(content).unwrap();
        assert_eq!(headers, vec!["Straße", "Hausnummer", "PLZ", "Ort"]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Straße"), Some("Hauptstraße"));
        assert_eq!(rows[0].get("Ort"), Some("Berlin"));
    }

    #[test]
    fn parses_comma_delimited_export() {
        let content = "Street,No,Zip,City\nMain Road,1,12345,Berlin\n";
        let (headers, rows) = parse_csv(content).unwrap();
        assert_eq!(headers[0], "Street");
        assert_eq!(rows[0].get("No"), Some("1"));
    }

    #[test]
    fn short_rows_leave_trailing_cells_absent() {
        let content = "Straße;Hausnummer;PLZ\nHauptstraße;3\n";
        let (_, rows) = parse_csv(content).unwrap();
        assert_eq!(rows[0].get("Hausnummer"), Some("3"));
        assert_eq!(rows[0].get("PLZ"), None);
    }
}
