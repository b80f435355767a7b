//! Compile-time registry of geocoding service configurations.
//!
//! Each provider is defined in a TOML file under `services/`. The
//! registry embeds these at compile time and exposes them via
//! [`all_services`] and [`enabled_services`].

use serde::Deserialize;

/// A geocoding service configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingService {
    /// Unique identifier (e.g., `"overpass"`, `"nominatim"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this service is active in the geocoding pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Execution order — lower values run first.
    pub priority: u32,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Overpass API structured address-tag search.
    Overpass {
        /// API base URL (e.g., `"https://overpass-api.de/api/interpreter"`).
        base_url: String,
        /// `ISO3166-1` code scoping queries when no city is given.
        country_code: String,
    },
    /// Nominatim free-text search.
    Nominatim {
        /// API base URL (e.g., `"https://nominatim.openstreetmap.org/search"`).
        base_url: String,
        /// Lowercase country code for the `countrycodes` filter.
        country_code: String,
    },
}

const fn default_true() -> bool {
    true
}

impl GeocodingService {
    /// Returns the provider's base URL regardless of variant.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.provider {
            ProviderConfig::Overpass { base_url, .. }
            | ProviderConfig::Nominatim { base_url, .. } => base_url,
        }
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("overpass", include_str!("../services/overpass.toml")),
    ("nominatim", include_str!("../services/nominatim.toml")),
];

#[cfg(test)]
const EXPECTED_SERVICE_COUNT: usize = 2;

/// Returns all geocoding service configurations (enabled and disabled).
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time
/// guarantee since the configs are embedded).
#[must_use]
pub fn all_services() -> Vec<GeocodingService> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse geocoding service '{name}': {e}"))
        })
        .collect()
}

/// Returns only enabled services, sorted by priority (ascending).
#[must_use]
pub fn enabled_services() -> Vec<GeocodingService> {
    let mut services: Vec<GeocodingService> =
        all_services().into_iter().filter(|s| s.enabled).collect();
    services.sort_by_key(|s| s.priority);
    services
}
