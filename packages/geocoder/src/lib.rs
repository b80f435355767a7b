#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocoding for imported address records.
//!
//! Converts street addresses to latitude/longitude coordinates using a
//! two-tier strategy configured via TOML files in `services/`:
//!
//! 1. **Overpass structured search** (priority 1) — queries OSM address
//!    tags (`addr:street` / `addr:housenumber`) scoped to the named
//!    city's administrative area, or the whole country when no city is
//!    given.
//! 2. **Nominatim free-text search** (priority 2) — fallback for
//!    addresses the structured query misses. When the top candidate
//!    carries polygon geometry, the true geometric centroid is computed
//!    instead of trusting the service's point estimate.
//!
//! Providers are loaded from the [`service_registry`] and executed in
//! priority order. A provider error falls through transparently to the
//! next tier; coordinates are never fabricated.

pub mod nominatim;
pub mod overpass;
pub mod service_registry;

use service_registry::{GeocodingService, ProviderConfig};
use thiserror::Error;

/// An address to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressQuery {
    /// Street name.
    pub street: String,
    /// House number, possibly with suffix.
    pub house_number: String,
    /// Postal code, if known.
    pub postal_code: Option<String>,
    /// City, if known.
    pub city: Option<String>,
}

impl AddressQuery {
    /// One-line free-text form for fallback searches
    /// (`"Hauptstraße 3, 12345 Berlin"`).
    #[must_use]
    pub fn free_text(&self) -> String {
        let mut text = format!("{} {}", self.street, self.house_number);
        let area: Vec<&str> = [self.postal_code.as_deref(), self.city.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if !area.is_empty() {
            text.push_str(", ");
            text.push_str(&area.join(" "));
        }
        text
    }
}

/// A resolved coordinate pair with the provider's canonical address.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCoordinates {
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lng: f64,
    /// The matched/canonical address returned by the provider.
    pub display_name: Option<String>,
}

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// No provider could resolve the address.
    #[error("Address not found: {address}")]
    NotFound {
        /// Free-text form of the unresolved address.
        address: String,
    },
}

/// Resolves a single address through the configured providers in
/// priority order.
///
/// A provider miss or error falls through to the next provider; when
/// every provider misses, [`GeocodeError::NotFound`] is returned.
///
/// # Errors
///
/// Returns [`GeocodeError::NotFound`] if no provider resolves the
/// address. Provider-level HTTP/parse errors are logged and swallowed
/// by the fall-through.
pub async fn resolve(
    client: &reqwest::Client,
    services: &[GeocodingService],
    query: &AddressQuery,
) -> Result<ResolvedCoordinates, GeocodeError> {
    for service in services.iter().filter(|s| s.enabled) {
        let result = match &service.provider {
            ProviderConfig::Overpass {
                base_url,
                country_code,
            } => overpass::geocode_structured(client, base_url, country_code, query).await,
            ProviderConfig::Nominatim {
                base_url,
                country_code,
            } => nominatim::geocode_freetext(client, base_url, country_code, query).await,
        };

        match result {
            Ok(Some(resolved)) => {
                log::debug!(
                    "{}: resolved '{}' to ({}, {})",
                    service.id,
                    query.free_text(),
                    resolved.lat,
                    resolved.lng
                );
                return Ok(resolved);
            }
            Ok(None) => {
                log::debug!("{}: no match for '{}'", service.id, query.free_text());
            }
            Err(e) => {
                log::warn!("{}: error for '{}': {e}", service.id, query.free_text());
            }
        }
    }

    Err(GeocodeError::NotFound {
        address: query.free_text(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_text_includes_postal_and_city() {
        let query = AddressQuery {
            street: "Hauptstraße".to_string(),
            house_number: "3a".to_string(),
            postal_code: Some("12345".to_string()),
            city: Some("Berlin".to_string()),
        };
        assert_eq!(query.free_text(), "Hauptstraße 3a, 12345 Berlin");
    }

    #[test]
    fn free_text_without_area_parts() {
        let query = AddressQuery {
            street: "Hauptstraße".to_string(),
            house_number: "3".to_string(),
            postal_code: None,
            city: None,
        };
        assert_eq!(query.free_text(), "Hauptstraße 3");
    }
}
