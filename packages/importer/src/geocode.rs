//! Resumable batch geocoding driver.
//!
//! One invocation processes up to [`GEOCODE_BATCH_SIZE`] coordinate-less
//! addresses of a list concurrently, persists successes immediately,
//! logs failures to the list's append-only failure log, and enqueues a
//! continuation step while work remains. Work selection always
//! re-queries "still missing coordinates" instead of tracking an
//! offset, so repeated or overlapping invocations for the same list are
//! safe — at worst an address is redundantly re-resolved, never
//! corrupted.

use address_pipeline_geocoder::{
    AddressQuery, GeocodeError, ResolvedCoordinates, resolve, service_registry,
};
use address_pipeline_models::{AddressRecord, FailedAddress, FailureKind, ImportStatus};
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::ImportError;
use crate::queue::GeocodeQueue;
use crate::store::ImportStore;

/// Maximum addresses resolved per batch step. Bounds concurrent
/// requests against the external services and keeps one step inside any
/// host execution-time ceiling.
pub const GEOCODE_BATCH_SIZE: u32 = 50;

/// Resolution seam for the batch driver.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Resolves one address to coordinates.
    async fn resolve(&self, query: &AddressQuery) -> Result<ResolvedCoordinates, GeocodeError>;
}

/// Production resolver running the two-tier provider pipeline.
pub struct TieredResolver {
    client: reqwest::Client,
    services: Vec<service_registry::GeocodingService>,
}

impl TieredResolver {
    /// Builds a resolver over the enabled services from the registry.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            services: service_registry::enabled_services(),
        }
    }
}

#[async_trait]
impl AddressResolver for TieredResolver {
    async fn resolve(&self, query: &AddressQuery) -> Result<ResolvedCoordinates, GeocodeError> {
        resolve(&self.client, &self.services, query).await
    }
}

/// Result of one batch step.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    /// Whether the step itself ran to completion.
    pub success: bool,
    /// Human-readable progress summary.
    pub message: String,
    /// Addresses still awaiting resolution after this step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
}

/// Per-address result inside one batch step.
enum AddressOutcome {
    Resolved,
    Failed(i64, FailedAddress),
    StoreError(ImportError),
}

/// Converts an address record into the resolver's query shape. Empty
/// optional components are dropped so the structured tier scopes
/// correctly.
fn query_for(record: &AddressRecord) -> AddressQuery {
    let non_empty = |value: &str| {
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    };

    AddressQuery {
        street: record.address.street.clone(),
        house_number: record.address.house_number.clone(),
        postal_code: non_empty(&record.address.postal_code),
        city: non_empty(&record.address.city),
    }
}

/// Runs one batch step for a list.
///
/// 1. Select up to [`GEOCODE_BATCH_SIZE`] unresolved addresses; none
///    left means the list is `completed` (idempotent terminal check).
/// 2. Resolve all selected addresses concurrently. Successes persist
///    coordinates immediately; failures are appended to the failure log
///    and marked attempted — no within-step retry.
/// 3. Re-count. Work remaining enqueues a continuation step; zero
///    remaining completes the list.
///
/// # Errors
///
/// Returns [`ImportError`] on store failures. The step is safe to
/// retry: committed successes and logged failures are never rolled
/// back, and work selection re-picks only what is still unresolved.
pub async fn geocode_step(
    store: &dyn ImportStore,
    resolver: &dyn AddressResolver,
    continuation: Option<&GeocodeQueue>,
    list_id: Uuid,
) -> Result<BatchOutcome, ImportError> {
    let batch = store.select_unresolved(list_id, GEOCODE_BATCH_SIZE).await?;

    if batch.is_empty() {
        store.set_status(list_id, ImportStatus::Completed).await?;
        return Ok(BatchOutcome {
            success: true,
            message: format!("List {list_id} has no unresolved addresses"),
            remaining: Some(0),
        });
    }

    log::info!("List {list_id}: geocoding batch of {} addresses", batch.len());

    let outcomes = futures::future::join_all(batch.iter().map(|record| async move {
        let query = query_for(record);
        match resolver.resolve(&query).await {
            Ok(coords) => match store.set_coordinates(record.id, coords.lat, coords.lng).await {
                Ok(()) => AddressOutcome::Resolved,
                Err(e) => AddressOutcome::StoreError(e),
            },
            Err(e) => AddressOutcome::Failed(
                record.id,
                FailedAddress {
                    address: record.address.display_line(),
                    reason: e.to_string(),
                    kind: FailureKind::Geocoding,
                },
            ),
        }
    }))
    .await;

    let mut resolved = 0usize;
    let mut failed_ids: Vec<i64> = Vec::new();
    let mut failures: Vec<FailedAddress> = Vec::new();
    let mut store_error: Option<ImportError> = None;

    for outcome in outcomes {
        match outcome {
            AddressOutcome::Resolved => resolved += 1,
            AddressOutcome::Failed(id, entry) => {
                log::warn!("List {list_id}: could not geocode '{}': {}", entry.address, entry.reason);
                failed_ids.push(id);
                failures.push(entry);
            }
            AddressOutcome::StoreError(e) => {
                if store_error.is_none() {
                    store_error = Some(e);
                } else {
                    log::error!("List {list_id}: additional store error in batch: {e}");
                }
            }
        }
    }

    store.append_failures(list_id, &failures).await?;
    store.mark_attempted(&failed_ids).await?;

    // A persistence failure is hard for this step; the successes and
    // failure-log entries already committed stay committed, and a retry
    // re-selects only what is still unresolved.
    if let Some(e) = store_error {
        return Err(e);
    }

    let remaining = store.count_unresolved(list_id).await?;

    if remaining > 0 {
        if let Some(queue) = continuation {
            queue.enqueue(list_id);
        }
    } else {
        store.set_status(list_id, ImportStatus::Completed).await?;
        log::info!("List {list_id}: geocoding completed ({} failed in this step)", failures.len());
    }

    Ok(BatchOutcome {
        success: true,
        message: format!(
            "Resolved {resolved} addresses, {} failed, {remaining} remaining",
            failures.len()
        ),
        remaining: Some(remaining),
    })
}

/// In-memory store and resolver stubs shared by the driver and queue
/// tests.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::store::ImportStore;
    use address_pipeline_models::{AddressStatus, NormalizedAddress};
    use address_pipeline_normalize::normalized_key;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory store stub mirroring the work-selection semantics of
    /// the real query layer.
    #[derive(Default)]
    pub struct MemoryStore {
        inner: Mutex<MemoryState>,
    }

    #[derive(Default)]
    struct MemoryState {
        addresses: BTreeMap<i64, (AddressRecord, bool)>,
        failures: Vec<FailedAddress>,
        status: Option<ImportStatus>,
    }

    impl MemoryStore {
        pub fn with_addresses(list_id: Uuid, count: usize) -> Self {
            let store = Self::default();
            {
                let mut state = store.inner.lock().unwrap();
                for i in 0..count {
                    let id = i64::try_from(i).unwrap() + 1;
                    let street = format!("Teststraße {i}");
                    let record = AddressRecord {
                        id,
                        list_id,
                        address: NormalizedAddress {
                            normalized_key: normalized_key(&street, "1", "12345", "Berlin"),
                            street,
                            house_number: "1".to_string(),
                            postal_code: "12345".to_string(),
                            city: "Berlin".to_string(),
                            locality: None,
                            we_count: 1,
                            etage: None,
                            lage: None,
                            notiz_adresse: None,
                            notiz_we: None,
                            status: AddressStatus::New,
                        },
                        lat: None,
                        lng: None,
                    };
                    state.addresses.insert(id, (record, false));
                }
            }
            store
        }

        pub fn resolved_count(&self) -> usize {
            self.inner
                .lock()
                .unwrap()
                .addresses
                .values()
                .filter(|entry| entry.0.lat.is_some())
                .count()
        }

        pub fn status(&self) -> Option<ImportStatus> {
            self.inner.lock().unwrap().status
        }

        pub fn failures(&self) -> Vec<FailedAddress> {
            self.inner.lock().unwrap().failures.clone()
        }
    }

    #[async_trait]
    impl ImportStore for MemoryStore {
        async fn select_unresolved(
            &self,
            _list_id: Uuid,
            limit: u32,
        ) -> Result<Vec<AddressRecord>, ImportError> {
            let state = self.inner.lock().unwrap();
            Ok(state
                .addresses
                .values()
                .filter(|entry| entry.0.lat.is_none() && !entry.1)
                .take(limit as usize)
                .map(|entry| entry.0.clone())
                .collect())
        }

        async fn set_coordinates(
            &self,
            address_id: i64,
            lat: f64,
            lng: f64,
        ) -> Result<(), ImportError> {
            let mut state = self.inner.lock().unwrap();
            let (record, attempted) = state.addresses.get_mut(&address_id).unwrap();
            record.lat = Some(lat);
            record.lng = Some(lng);
            *attempted = true;
            Ok(())
        }

        async fn mark_attempted(&self, address_ids: &[i64]) -> Result<(), ImportError> {
            let mut state = self.inner.lock().unwrap();
            for id in address_ids {
                if let Some((_, attempted)) = state.addresses.get_mut(id) {
                    *attempted = true;
                }
            }
            Ok(())
        }

        async fn append_failures(
            &self,
            _list_id: Uuid,
            entries: &[FailedAddress],
        ) -> Result<(), ImportError> {
            self.inner
                .lock()
                .unwrap()
                .failures
                .extend_from_slice(entries);
            Ok(())
        }

        async fn count_unresolved(&self, _list_id: Uuid) -> Result<u64, ImportError> {
            let state = self.inner.lock().unwrap();
            Ok(state
                .addresses
                .values()
                .filter(|entry| entry.0.lat.is_none() && !entry.1)
                .count() as u64)
        }

        async fn set_status(
            &self,
            _list_id: Uuid,
            status: ImportStatus,
        ) -> Result<(), ImportError> {
            self.inner.lock().unwrap().status = Some(status);
            Ok(())
        }
    }

    /// Resolver stub that succeeds for every address.
    pub struct AlwaysResolves;

    #[async_trait]
    impl AddressResolver for AlwaysResolves {
        async fn resolve(
            &self,
            _query: &AddressQuery,
        ) -> Result<ResolvedCoordinates, GeocodeError> {
            Ok(ResolvedCoordinates {
                lat: 52.52,
                lng: 13.405,
                display_name: None,
            })
        }
    }

    /// Resolver stub that fails for streets containing a marker.
    pub struct FailsMarked;

    #[async_trait]
    impl AddressResolver for FailsMarked {
        async fn resolve(
            &self,
            query: &AddressQuery,
        ) -> Result<ResolvedCoordinates, GeocodeError> {
            if query.street.contains('7') {
                Err(GeocodeError::NotFound {
                    address: query.free_text(),
                })
            } else {
                Ok(ResolvedCoordinates {
                    lat: 48.137,
                    lng: 11.575,
                    display_name: None,
                })
            }
        }
    }
}
