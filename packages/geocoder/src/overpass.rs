//! Overpass API structured search (Tier 1).
//!
//! Queries OSM address tags (`addr:street` / `addr:housenumber`,
//! optionally `addr:postcode` / `addr:city`) spatially scoped to the
//! named city's administrative area, falling back to the whole country
//! when no city is given.
//!
//! See <https://wiki.openstreetmap.org/wiki/Overpass_API/Overpass_QL>

use crate::{AddressQuery, GeocodeError, ResolvedCoordinates};

/// Escapes a value for use inside a quoted Overpass QL string.
fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Builds the Overpass QL query for an address.
///
/// Matches nodes, ways, and relations carrying the address tags;
/// `out center` adds a representative point for non-node features so
/// every candidate has coordinates.
#[must_use]
pub fn build_query(country_code: &str, query: &AddressQuery) -> String {
    let area = query.city.as_deref().map_or_else(
        || {
            format!(
                "area[\"ISO3166-1\"=\"{}\"][\"admin_level\"=\"2\"]->.searchArea;",
                escape(country_code)
            )
        },
        |city| {
            format!(
                "area[\"name\"=\"{}\"][\"boundary\"=\"administrative\"][\"admin_level\"~\"^(6|8)$\"]->.searchArea;",
                escape(city)
            )
        },
    );

    let mut tags = format!(
        "[\"addr:street\"=\"{}\"][\"addr:housenumber\"=\"{}\"]",
        escape(&query.street),
        escape(&query.house_number)
    );
    if let Some(postal_code) = &query.postal_code {
        tags.push_str(&format!("[\"addr:postcode\"=\"{}\"]", escape(postal_code)));
    }

    format!(
        "[out:json][timeout:25];\n\
         {area}\n\
         (\n\
           node{tags}(area.searchArea);\n\
           way{tags}(area.searchArea);\n\
           relation{tags}(area.searchArea);\n\
         );\n\
         out center 10;"
    )
}

/// Resolves an address via the Overpass structured search.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP request or response parsing
/// fails.
pub async fn geocode_structured(
    client: &reqwest::Client,
    base_url: &str,
    country_code: &str,
    query: &AddressQuery,
) -> Result<Option<ResolvedCoordinates>, GeocodeError> {
    let ql = build_query(country_code, query);

    let resp = client
        .post(base_url)
        .form(&[("data", ql.as_str())])
        .send()
        .await?;

    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GeocodeError::RateLimited);
    }

    if !resp.status().is_success() {
        return Err(GeocodeError::Parse {
            message: format!("Overpass returned status {}", resp.status()),
        });
    }

    let body: serde_json::Value = resp.json().await?;
    parse_response(&body)
}

/// Candidate precedence: a point feature beats one derived from a
/// linear feature, which beats one derived from an areal feature.
fn precedence(element_type: &str) -> Option<usize> {
    match element_type {
        "node" => Some(0),
        "way" => Some(1),
        "relation" => Some(2),
        _ => None,
    }
}

/// Extracts coordinates from an Overpass element. Nodes carry their own
/// position; ways and relations carry a derived `center`.
fn coordinates_of(element: &serde_json::Value) -> Option<(f64, f64)> {
    let source = if element["type"] == "node" {
        element
    } else {
        &element["center"]
    };
    Some((source["lat"].as_f64()?, source["lon"].as_f64()?))
}

/// Builds a display name from the element's address tags.
fn display_name(element: &serde_json::Value) -> Option<String> {
    let tags = &element["tags"];
    let street = tags["addr:street"].as_str()?;
    let house_number = tags["addr:housenumber"].as_str()?;

    let mut name = format!("{street} {house_number}");
    let area: Vec<&str> = [tags["addr:postcode"].as_str(), tags["addr:city"].as_str()]
        .into_iter()
        .flatten()
        .collect();
    if !area.is_empty() {
        name.push_str(", ");
        name.push_str(&area.join(" "));
    }
    Some(name)
}

/// Parses an Overpass JSON response, picking the best candidate by
/// node > way > relation precedence.
fn parse_response(body: &serde_json::Value) -> Result<Option<ResolvedCoordinates>, GeocodeError> {
    let elements = body["elements"]
        .as_array()
        .ok_or_else(|| GeocodeError::Parse {
            message: "Overpass response missing 'elements' array".to_string(),
        })?;

    let mut best: Option<(usize, ResolvedCoordinates)> = None;

    for element in elements {
        let Some(rank) = element["type"].as_str().and_then(precedence) else {
            continue;
        };
        let Some((lat, lng)) = coordinates_of(element) else {
            continue;
        };

        if best.as_ref().is_none_or(|&(best_rank, _)| rank < best_rank) {
            best = Some((
                rank,
                ResolvedCoordinates {
                    lat,
                    lng,
                    display_name: display_name(element),
                },
            ));
        }
    }

    Ok(best.map(|(_, resolved)| resolved))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> AddressQuery {
        AddressQuery {
            street: "Hauptstraße".to_string(),
            house_number: "3".to_string(),
            postal_code: Some("12345".to_string()),
            city: Some("Berlin".to_string()),
        }
    }

    #[test]
    fn query_is_scoped_to_city_area() {
        let ql = build_query("DE", &query());
        assert!(ql.contains(r#"area["name"="Berlin"]"#));
        assert!(ql.contains(r#"["addr:street"="Hauptstraße"]"#));
        assert!(ql.contains(r#"["addr:housenumber"="3"]"#));
        assert!(ql.contains(r#"["addr:postcode"="12345"]"#));
    }

    #[test]
    fn query_falls_back_to_country_scope() {
        let mut q = query();
        q.city = None;
        let ql = build_query("DE", &q);
        assert!(ql.contains(r#"area["ISO3166-1"="DE"]"#));
    }

    #[test]
    fn escapes_quotes_in_values() {
        let mut q = query();
        q.street = "Zum \"Goldenen\" Anker".to_string();
        let ql = build_query("DE", &q);
        assert!(ql.contains(r#"Zum \"Goldenen\" Anker"#));
    }

    #[test]
    fn prefers_node_over_way_center() {
        let body = serde_json::json!({
            "elements": [
                {
                    "type": "way",
                    "center": {"lat": 52.0, "lon": 13.0},
                    "tags": {"addr:street": "Hauptstraße", "addr:housenumber": "3"}
                },
                {
                    "type": "node",
                    "lat": 52.5201,
                    "lon": 13.4050,
                    "tags": {"addr:street": "Hauptstraße", "addr:housenumber": "3"}
                }
            ]
        });
        let resolved = parse_response(&body).unwrap().unwrap();
        assert!((resolved.lat - 52.5201).abs() < 1e-6);
        assert!((resolved.lng - 13.4050).abs() < 1e-6);
    }

    #[test]
    fn prefers_way_over_relation() {
        let body = serde_json::json!({
            "elements": [
                {"type": "relation", "center": {"lat": 50.0, "lon": 10.0}, "tags": {}},
                {"type": "way", "center": {"lat": 51.0, "lon": 11.0}, "tags": {}}
            ]
        });
        let resolved = parse_response(&body).unwrap().unwrap();
        assert!((resolved.lat - 51.0).abs() < 1e-6);
    }

    #[test]
    fn uses_way_center_when_no_node_matches() {
        let body = serde_json::json!({
            "elements": [{
                "type": "way",
                "center": {"lat": 48.1351, "lon": 11.5820},
                "tags": {
                    "addr:street": "Marienplatz",
                    "addr:housenumber": "8",
                    "addr:postcode": "80331",
                    "addr:city": "München"
                }
            }]
        });
        let resolved = parse_response(&body).unwrap().unwrap();
        assert!((resolved.lat - 48.1351).abs() < 1e-6);
        assert_eq!(
            resolved.display_name.as_deref(),
            Some("Marienplatz 8, 80331 München")
        );
    }

    #[test]
    fn empty_elements_yield_none() {
        let body = serde_json::json!({"elements": []});
        assert!(parse_response(&body).unwrap().is_none());
    }

    #[test]
    fn missing_elements_is_parse_error() {
        let body = serde_json::json!({"remark": "timeout"});
        assert!(parse_response(&body).is_err());
    }
}
