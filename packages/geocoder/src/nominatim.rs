//! Nominatim free-text search (Tier 2).
//!
//! Fallback for addresses the structured query misses. Nominatim has
//! strict rate limits on the public instance; the batch driver bounds
//! concurrency accordingly.
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use geo::Centroid as _;

use crate::{AddressQuery, GeocodeError, ResolvedCoordinates};

/// Resolves an address via a free-text Nominatim search, taking the
/// top-ranked candidate.
///
/// Requests polygon geometry alongside the point estimate: for
/// candidates backed by a boundary polygon (large parcels, whole
/// buildings) the true geometric centroid of that polygon is more
/// accurate than the service's interpolated point.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP request or response parsing
/// fails.
pub async fn geocode_freetext(
    client: &reqwest::Client,
    base_url: &str,
    country_code: &str,
    query: &AddressQuery,
) -> Result<Option<ResolvedCoordinates>, GeocodeError> {
    let resp = client
        .get(base_url)
        .query(&[
            ("q", query.free_text().as_str()),
            ("countrycodes", country_code),
            ("format", "jsonv2"),
            ("limit", "1"),
            ("polygon_geojson", "1"),
        ])
        .send()
        .await?;

    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GeocodeError::RateLimited);
    }

    let body: serde_json::Value = resp.json().await?;
    parse_response(&body)
}

/// Parses a Nominatim JSON response.
fn parse_response(body: &serde_json::Value) -> Result<Option<ResolvedCoordinates>, GeocodeError> {
    let results = body.as_array().ok_or_else(|| GeocodeError::Parse {
        message: "Nominatim response is not an array".to_string(),
    })?;

    let Some(first) = results.first() else {
        return Ok(None);
    };

    let lat = first["lat"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing lat in Nominatim response".to_string(),
        })?;

    let lng = first["lon"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "Missing lon in Nominatim response".to_string(),
        })?;

    let display_name = first["display_name"].as_str().map(String::from);

    // Boundary candidates get the polygon's own centroid instead of the
    // service's point estimate.
    let (lat, lng) = polygon_centroid(&first["geojson"]).unwrap_or((lat, lng));

    Ok(Some(ResolvedCoordinates {
        lat,
        lng,
        display_name,
    }))
}

/// Computes the area-weighted (shoelace) centroid of a polygon or
/// multipolygon `GeoJSON` geometry. Returns `None` for point/line
/// geometry or anything that fails to parse.
fn polygon_centroid(geometry: &serde_json::Value) -> Option<(f64, f64)> {
    let geometry: geojson::Geometry = serde_json::from_value(geometry.clone()).ok()?;
    let geo_geometry: geo::Geometry<f64> = geometry.try_into().ok()?;

    let centroid = match geo_geometry {
        geo::Geometry::Polygon(polygon) => polygon.centroid(),
        geo::Geometry::MultiPolygon(multi_polygon) => multi_polygon.centroid(),
        _ => None,
    }?;

    Some((centroid.y(), centroid.x()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_point_result() {
        let body = serde_json::json!([{
            "lat": "52.5201",
            "lon": "13.4050",
            "display_name": "Hauptstraße 3, 12345 Berlin, Deutschland"
        }]);
        let resolved = parse_response(&body).unwrap().unwrap();
        assert!((resolved.lat - 52.5201).abs() < 1e-6);
        assert!((resolved.lng - 13.4050).abs() < 1e-6);
        assert_eq!(
            resolved.display_name.as_deref(),
            Some("Hauptstraße 3, 12345 Berlin, Deutschland")
        );
    }

    #[test]
    fn polygon_candidate_uses_true_centroid() {
        let body = serde_json::json!([{
            "lat": "0.9",
            "lon": "0.9",
            "display_name": "Großes Grundstück",
            "geojson": {
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
            }
        }]);
        let resolved = parse_response(&body).unwrap().unwrap();
        // The unit square's centroid, not the service's (0.9, 0.9).
        assert!((resolved.lat - 0.5).abs() < 1e-9);
        assert!((resolved.lng - 0.5).abs() < 1e-9);
    }

    #[test]
    fn point_geometry_keeps_service_estimate() {
        let body = serde_json::json!([{
            "lat": "52.0",
            "lon": "13.0",
            "geojson": {"type": "Point", "coordinates": [13.0, 52.0]}
        }]);
        let resolved = parse_response(&body).unwrap().unwrap();
        assert!((resolved.lat - 52.0).abs() < 1e-9);
        assert!((resolved.lng - 13.0).abs() < 1e-9);
    }

    #[test]
    fn parses_empty_response() {
        let body = serde_json::json!([]);
        assert!(parse_response(&body).unwrap().is_none());
    }

    #[test]
    fn non_array_response_is_parse_error() {
        let body = serde_json::json!({"error": "bad request"});
        assert!(parse_response(&body).is_err());
    }
}
