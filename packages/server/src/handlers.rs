//! HTTP handler functions for the import pipeline API.

use actix_web::{HttpResponse, web};
use address_pipeline_database::DbError;
use address_pipeline_geocoder::{AddressQuery, GeocodeError};
use address_pipeline_importer::geocode::{AddressResolver as _, geocode_step};
use address_pipeline_importer::{AnalyzeRequest, ImportError, analyze, import_rows};
use address_pipeline_models::{ColumnMapping, RawRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;

/// Health check payload.
#[derive(Serialize)]
struct ApiHealth {
    healthy: bool,
    version: String,
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Maps pipeline errors onto the API error taxonomy: invalid input is
/// 400, missing records are 404, everything else is 500.
fn error_response(e: &ImportError) -> HttpResponse {
    match e {
        ImportError::Input { message } => {
            HttpResponse::BadRequest().json(serde_json::json!({ "error": message }))
        }
        ImportError::Db(DbError::NotFound { what }) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": what }))
        }
        _ => {
            log::error!("Request failed: {e}");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "Internal error" }))
        }
    }
}

/// `POST /api/import-lists/analyze`
///
/// Infers a column mapping for uploaded headers, preferring a saved
/// provider mapping.
pub async fn analyze_columns(
    state: web::Data<AppState>,
    request: web::Json<AnalyzeRequest>,
) -> HttpResponse {
    match analyze(state.db.as_ref(), &request).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => error_response(&e),
    }
}

/// Body of the import confirmation request.
#[derive(Deserialize)]
pub struct ImportBody {
    /// The confirmed column mapping.
    mapping: ColumnMapping,
    /// The file's data rows.
    rows: Vec<RawRow>,
}

/// `POST /api/import-lists/{id}/import`
///
/// Imports confirmed rows into a list and hands it to the geocoding
/// queue.
pub async fn import_list_rows(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<ImportBody>,
) -> HttpResponse {
    let list_id = path.into_inner();

    match import_rows(
        state.db.as_ref(),
        Some(&state.queue),
        list_id,
        &body.mapping,
        &body.rows,
    )
    .await
    {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => error_response(&e),
    }
}

/// `POST /api/import-lists/{id}/geocode`
///
/// Runs one batch geocoding step. While addresses remain, the
/// continuation queue keeps the list progressing after the response is
/// sent.
pub async fn geocode_batch(state: web::Data<AppState>, path: web::Path<Uuid>) -> HttpResponse {
    let list_id = path.into_inner();

    match geocode_step(
        state.store.as_ref(),
        state.resolver.as_ref(),
        Some(&state.queue),
        list_id,
    )
    .await
    {
        Ok(outcome) => HttpResponse::Ok().json(outcome),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/import-lists`
///
/// Lists all import lists with status and failure log.
pub async fn import_lists(state: web::Data<AppState>) -> HttpResponse {
    match address_pipeline_database::queries::list_import_lists(state.db.as_ref()).await {
        Ok(lists) => HttpResponse::Ok().json(lists),
        Err(e) => {
            log::error!("Failed to query import lists: {e}");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "Failed to query import lists" }))
        }
    }
}

/// Body of the single-address geocode request.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeBody {
    street: String,
    house_number: String,
    #[serde(default)]
    postal_code: Option<String>,
    #[serde(default)]
    city: Option<String>,
}

/// Successful single-address geocode payload.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeocodeResponse {
    coordinates: Coordinates,
    display_name: Option<String>,
}

#[derive(Serialize)]
struct Coordinates {
    lat: f64,
    lng: f64,
}

/// `POST /api/geocode`
///
/// Resolves a single address through the two-tier pipeline.
pub async fn geocode_single(state: web::Data<AppState>, body: web::Json<GeocodeBody>) -> HttpResponse {
    let body = body.into_inner();

    if body.street.trim().is_empty() || body.house_number.trim().is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "street and houseNumber are required"
        }));
    }

    let query = AddressQuery {
        street: body.street,
        house_number: body.house_number,
        postal_code: body.postal_code.filter(|v| !v.trim().is_empty()),
        city: body.city.filter(|v| !v.trim().is_empty()),
    };

    match state.resolver.resolve(&query).await {
        Ok(resolved) => HttpResponse::Ok().json(GeocodeResponse {
            coordinates: Coordinates {
                lat: resolved.lat,
                lng: resolved.lng,
            },
            display_name: resolved.display_name,
        }),
        Err(e @ GeocodeError::NotFound { .. }) => {
            HttpResponse::NotFound().json(serde_json::json!({
                "coordinates": null,
                "error": e.to_string(),
            }))
        }
        Err(e) => {
            log::error!("Geocoding failed for '{}': {e}", query.free_text());
            HttpResponse::InternalServerError().json(serde_json::json!({
                "coordinates": null,
                "error": "Geocoding failed",
            }))
        }
    }
}
