//! Database query functions for import lists, address records, and
//! saved column mappings.
//!
//! JSON-typed columns (`column_mapping`, `error_details`, saved mapping
//! `headers`) are selected with a `::text` cast and decoded via
//! `serde_json`, and written with a `::jsonb` cast.

use address_pipeline_models::{
    AddressRecord, AddressStatus, ColumnMapping, ErrorDetails, FailedAddress, ImportList,
    ImportStatus, NormalizedAddress, SavedMapping,
};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use uuid::Uuid;

use crate::DbError;

/// Serializes a value for a `jsonb` parameter.
fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DbError> {
    serde_json::to_string(value).map_err(|e| DbError::Conversion {
        message: format!("Failed to encode JSON parameter: {e}"),
    })
}

/// Creates a new import list in `pending` state.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn create_import_list(
    db: &dyn Database,
    id: Uuid,
    provider_id: Option<&str>,
    name: &str,
) -> Result<(), DbError> {
    db.exec_raw_params(
        "INSERT INTO import_lists (id, provider_id, name, status)
         VALUES ($1, $2, $3, $4)",
        &[
            DatabaseValue::String(id.to_string()),
            provider_id.map_or(DatabaseValue::Null, |p| DatabaseValue::String(p.to_string())),
            DatabaseValue::String(name.to_string()),
            DatabaseValue::String(ImportStatus::Pending.to_string()),
        ],
    )
    .await?;

    Ok(())
}

/// Fetches an import list by ID.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the list does not exist, or
/// [`DbError`] if the query fails.
pub async fn get_import_list(db: &dyn Database, id: Uuid) -> Result<ImportList, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT id, provider_id, name, column_mapping::text AS column_mapping,
                    status, error_details::text AS error_details, created_at, updated_at
             FROM import_lists WHERE id = $1",
            &[DatabaseValue::String(id.to_string())],
        )
        .await?;

    let row = rows.first().ok_or_else(|| DbError::NotFound {
        what: format!("import list {id}"),
    })?;

    parse_import_list(row)
}

/// Fetches all import lists, newest first.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn list_import_lists(db: &dyn Database) -> Result<Vec<ImportList>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT id, provider_id, name, column_mapping::text AS column_mapping,
                    status, error_details::text AS error_details, created_at, updated_at
             FROM import_lists ORDER BY created_at DESC",
            &[],
        )
        .await?;

    rows.iter().map(parse_import_list).collect()
}

fn parse_import_list(row: &switchy_database::Row) -> Result<ImportList, DbError> {
    let id: String = row.to_value("id").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse list id: {e}"),
    })?;
    let id = Uuid::parse_str(&id).map_err(|e| DbError::Conversion {
        message: format!("Invalid list id '{id}': {e}"),
    })?;

    let provider_id: Option<String> =
        row.to_value("provider_id").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse provider_id: {e}"),
        })?;

    let name: String = row.to_value("name").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse list name: {e}"),
    })?;

    let column_mapping: Option<String> =
        row.to_value("column_mapping")
            .map_err(|e| DbError::Conversion {
                message: format!("Failed to parse column_mapping: {e}"),
            })?;
    let column_mapping: Option<ColumnMapping> = column_mapping
        .map(|json| {
            serde_json::from_str(&json).map_err(|e| DbError::Conversion {
                message: format!("Invalid column_mapping JSON: {e}"),
            })
        })
        .transpose()?;

    let status: String = row.to_value("status").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse status: {e}"),
    })?;
    let status: ImportStatus = status.parse().map_err(|e| DbError::Conversion {
        message: format!("Unknown import status '{status}': {e}"),
    })?;

    let error_details: Option<String> =
        row.to_value("error_details").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse error_details: {e}"),
        })?;
    let error_details: ErrorDetails = error_details
        .map(|json| {
            serde_json::from_str(&json).map_err(|e| DbError::Conversion {
                message: format!("Invalid error_details JSON: {e}"),
            })
        })
        .transpose()?
        .unwrap_or_default();

    let created_at: chrono::NaiveDateTime =
        row.to_value("created_at").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse created_at: {e}"),
        })?;
    let updated_at: chrono::NaiveDateTime =
        row.to_value("updated_at").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse updated_at: {e}"),
        })?;

    Ok(ImportList {
        id,
        provider_id,
        name,
        column_mapping,
        status,
        error_details,
        created_at: created_at.and_utc(),
        updated_at: updated_at.and_utc(),
    })
}

/// Moves an import list to `next` status.
///
/// The status machine is forward-only; a transition that would move
/// backwards is logged and skipped rather than corrupting the
/// lifecycle. Re-asserting the current status is a no-op, which keeps
/// the batch driver's terminal check idempotent.
///
/// # Errors
///
/// Returns [`DbError`] if the fetch or update fails.
pub async fn update_list_status(
    db: &dyn Database,
    id: Uuid,
    next: ImportStatus,
) -> Result<(), DbError> {
    let current = get_import_list(db, id).await?.status;
    if !current.can_transition_to(next) {
        log::warn!("Ignoring backward status transition {current} -> {next} for list {id}");
        return Ok(());
    }

    db.exec_raw_params(
        "UPDATE import_lists SET status = $2, updated_at = NOW() WHERE id = $1",
        &[
            DatabaseValue::String(id.to_string()),
            DatabaseValue::String(next.to_string()),
        ],
    )
    .await?;

    Ok(())
}

/// Stores the confirmed column mapping on an import list.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn set_column_mapping(
    db: &dyn Database,
    id: Uuid,
    mapping: &ColumnMapping,
) -> Result<(), DbError> {
    db.exec_raw_params(
        "UPDATE import_lists SET column_mapping = $2::jsonb, updated_at = NOW() WHERE id = $1",
        &[
            DatabaseValue::String(id.to_string()),
            DatabaseValue::String(to_json(mapping)?),
        ],
    )
    .await?;

    Ok(())
}

/// Appends failure log entries to a list's `error_details`.
///
/// The log is append-only: entries are concatenated onto the existing
/// `failedAddresses` array in a single statement, so concurrent batch
/// steps never overwrite each other.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn append_failed_addresses(
    db: &dyn Database,
    id: Uuid,
    entries: &[FailedAddress],
) -> Result<(), DbError> {
    if entries.is_empty() {
        return Ok(());
    }

    db.exec_raw_params(
        "UPDATE import_lists
         SET error_details = jsonb_set(
                 COALESCE(error_details, '{}'::jsonb),
                 '{failedAddresses}',
                 COALESCE(error_details->'failedAddresses', '[]'::jsonb) || $2::jsonb
             ),
             updated_at = NOW()
         WHERE id = $1",
        &[
            DatabaseValue::String(id.to_string()),
            DatabaseValue::String(to_json(&entries)?),
        ],
    )
    .await?;

    Ok(())
}

/// Inserts consolidated address records for a list, without coordinates.
///
/// Returns the number of inserted rows.
///
/// # Errors
///
/// Returns [`DbError`] if any insert fails.
pub async fn insert_addresses(
    db: &dyn Database,
    list_id: Uuid,
    addresses: &[NormalizedAddress],
) -> Result<u64, DbError> {
    let mut inserted = 0u64;

    for address in addresses {
        inserted += db
            .exec_raw_params(
                "INSERT INTO addresses (
                    list_id, street, house_number, postal_code, city, locality,
                    we_count, etage, lage, notiz_adresse, notiz_we, status,
                    normalized_key
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
                &[
                    DatabaseValue::String(list_id.to_string()),
                    DatabaseValue::String(address.street.clone()),
                    DatabaseValue::String(address.house_number.clone()),
                    DatabaseValue::String(address.postal_code.clone()),
                    DatabaseValue::String(address.city.clone()),
                    address
                        .locality
                        .as_ref()
                        .map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.clone())),
                    DatabaseValue::Int32(i32::try_from(address.we_count).unwrap_or(i32::MAX)),
                    address
                        .etage
                        .as_ref()
                        .map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.clone())),
                    address
                        .lage
                        .as_ref()
                        .map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.clone())),
                    address
                        .notiz_adresse
                        .as_ref()
                        .map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.clone())),
                    address
                        .notiz_we
                        .as_ref()
                        .map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.clone())),
                    DatabaseValue::String(address.status.to_string()),
                    DatabaseValue::String(address.normalized_key.clone()),
                ],
            )
            .await?;
    }

    Ok(inserted)
}

/// Selects up to `limit` address records of a list that still lack
/// coordinates and have not been attempted yet — the batch geocoder's
/// work-selection query.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn select_unresolved(
    db: &dyn Database,
    list_id: Uuid,
    limit: u32,
) -> Result<Vec<AddressRecord>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT id, list_id, street, house_number, postal_code, city, locality,
                    we_count, etage, lage, notiz_adresse, notiz_we, status,
                    normalized_key, lat, lng
             FROM addresses
             WHERE list_id = $1 AND lat IS NULL AND geocoded = FALSE
             ORDER BY id
             LIMIT $2",
            &[
                DatabaseValue::String(list_id.to_string()),
                DatabaseValue::Int64(i64::from(limit)),
            ],
        )
        .await?;

    rows.iter().map(parse_address_record).collect()
}

/// Counts the addresses of a list that still lack coordinates.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn count_unresolved(db: &dyn Database, list_id: Uuid) -> Result<u64, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT COUNT(*) AS remaining FROM addresses
             WHERE list_id = $1 AND lat IS NULL AND geocoded = FALSE",
            &[DatabaseValue::String(list_id.to_string())],
        )
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: "COUNT query returned no rows".to_string(),
    })?;

    let remaining: i64 = row.to_value("remaining").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse unresolved count: {e}"),
    })?;

    Ok(u64::try_from(remaining).unwrap_or(0))
}

/// Persists resolved coordinates for an address record.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn set_coordinates(
    db: &dyn Database,
    address_id: i64,
    lat: f64,
    lng: f64,
) -> Result<(), DbError> {
    db.exec_raw_params(
        "UPDATE addresses SET lat = $2, lng = $3, geocoded = TRUE WHERE id = $1",
        &[
            DatabaseValue::Int64(address_id),
            DatabaseValue::Real64(lat),
            DatabaseValue::Real64(lng),
        ],
    )
    .await?;

    Ok(())
}

/// Marks addresses as attempted without changing their coordinates.
///
/// Used after both geocoding tiers have been exhausted for an address so
/// it won't be re-selected by the next batch iteration; the address
/// stays permanently coordinate-less.
///
/// # Errors
///
/// Returns [`DbError`] if the batch UPDATE statement fails.
pub async fn mark_geocode_attempted(db: &dyn Database, ids: &[i64]) -> Result<u64, DbError> {
    use std::fmt::Write as _;

    if ids.is_empty() {
        return Ok(0);
    }

    let mut sql = String::from("UPDATE addresses SET geocoded = TRUE WHERE id IN (");
    let mut params: Vec<DatabaseValue> = Vec::with_capacity(ids.len());

    for (i, &id) in ids.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        write!(sql, "${}", i + 1).unwrap();
        params.push(DatabaseValue::Int64(id));
    }

    sql.push(')');
    Ok(db.exec_raw_params(&sql, &params).await?)
}

fn parse_address_record(row: &switchy_database::Row) -> Result<AddressRecord, DbError> {
    let id: i64 = row.to_value("id").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse address id: {e}"),
    })?;

    let list_id: String = row.to_value("list_id").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse list_id: {e}"),
    })?;
    let list_id = Uuid::parse_str(&list_id).map_err(|e| DbError::Conversion {
        message: format!("Invalid list_id '{list_id}': {e}"),
    })?;

    let text = |name: &str| -> Result<String, DbError> {
        row.to_value(name).map_err(|e| DbError::Conversion {
            message: format!("Failed to parse {name}: {e}"),
        })
    };
    let opt_text = |name: &str| -> Result<Option<String>, DbError> {
        row.to_value(name).map_err(|e| DbError::Conversion {
            message: format!("Failed to parse {name}: {e}"),
        })
    };

    let we_count: i32 = row.to_value("we_count").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse we_count: {e}"),
    })?;

    let status: String = text("status")?;
    let status: AddressStatus = status.parse().map_err(|e| DbError::Conversion {
        message: format!("Unknown address status '{status}': {e}"),
    })?;

    let lat: Option<f64> = row.to_value("lat").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse lat: {e}"),
    })?;
    let lng: Option<f64> = row.to_value("lng").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse lng: {e}"),
    })?;

    Ok(AddressRecord {
        id,
        list_id,
        address: NormalizedAddress {
            street: text("street")?,
            house_number: text("house_number")?,
            postal_code: text("postal_code")?,
            city: text("city")?,
            locality: opt_text("locality")?,
            we_count: u32::try_from(we_count).unwrap_or(0),
            etage: opt_text("etage")?,
            lage: opt_text("lage")?,
            notiz_adresse: opt_text("notiz_adresse")?,
            notiz_we: opt_text("notiz_we")?,
            status,
            normalized_key: text("normalized_key")?,
        },
        lat,
        lng,
    })
}

/// Fetches the most-used saved mapping for a provider, if any.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn get_most_used_saved_mapping(
    db: &dyn Database,
    provider_id: &str,
) -> Result<Option<SavedMapping>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT id, provider_id, headers::text AS headers, mapping::text AS mapping,
                    usage_count
             FROM saved_mappings
             WHERE provider_id = $1
             ORDER BY usage_count DESC, updated_at DESC
             LIMIT 1",
            &[DatabaseValue::String(provider_id.to_string())],
        )
        .await?;

    rows.first().map(parse_saved_mapping).transpose()
}

fn parse_saved_mapping(row: &switchy_database::Row) -> Result<SavedMapping, DbError> {
    let id: String = row.to_value("id").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse saved mapping id: {e}"),
    })?;
    let id = Uuid::parse_str(&id).map_err(|e| DbError::Conversion {
        message: format!("Invalid saved mapping id '{id}': {e}"),
    })?;

    let provider_id: String = row.to_value("provider_id").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse provider_id: {e}"),
    })?;

    let headers: String = row.to_value("headers").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse headers: {e}"),
    })?;
    let headers: Vec<String> = serde_json::from_str(&headers).map_err(|e| DbError::Conversion {
        message: format!("Invalid headers JSON: {e}"),
    })?;

    let mapping: String = row.to_value("mapping").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse mapping: {e}"),
    })?;
    let mapping: ColumnMapping = serde_json::from_str(&mapping).map_err(|e| DbError::Conversion {
        message: format!("Invalid mapping JSON: {e}"),
    })?;

    let usage_count: i64 = row.to_value("usage_count").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse usage_count: {e}"),
    })?;

    Ok(SavedMapping {
        id,
        provider_id,
        headers,
        mapping,
        usage_count,
    })
}

/// Stores a confirmed mapping for a provider.
///
/// A mapping confirmed for the same provider and header set updates the
/// existing row and bumps its usage counter; otherwise a new row starts
/// at usage count 1. Returns the saved mapping's ID.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub async fn upsert_saved_mapping(
    db: &dyn Database,
    provider_id: &str,
    headers: &[String],
    mapping: &ColumnMapping,
) -> Result<Uuid, DbError> {
    let rows = db
        .query_raw_params(
            "INSERT INTO saved_mappings (id, provider_id, headers, mapping, usage_count)
             VALUES ($1, $2, $3::jsonb, $4::jsonb, 1)
             ON CONFLICT (provider_id, headers) DO UPDATE SET
                 mapping = EXCLUDED.mapping,
                 usage_count = saved_mappings.usage_count + 1,
                 updated_at = NOW()
             RETURNING id",
            &[
                DatabaseValue::String(Uuid::new_v4().to_string()),
                DatabaseValue::String(provider_id.to_string()),
                DatabaseValue::String(to_json(&headers)?),
                DatabaseValue::String(to_json(mapping)?),
            ],
        )
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: "Failed to get saved mapping id from upsert".to_string(),
    })?;

    let id: String = row.to_value("id").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse saved mapping id: {e}"),
    })?;

    Uuid::parse_str(&id).map_err(|e| DbError::Conversion {
        message: format!("Invalid saved mapping id '{id}': {e}"),
    })
}

/// Bumps the usage counter of a saved mapping that was reused verbatim.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn increment_saved_mapping_usage(db: &dyn Database, id: Uuid) -> Result<(), DbError> {
    db.exec_raw_params(
        "UPDATE saved_mappings SET usage_count = usage_count + 1, updated_at = NOW()
         WHERE id = $1",
        &[DatabaseValue::String(id.to_string())],
    )
    .await?;

    Ok(())
}
