//! Persistence seam for the batch geocoder.
//!
//! The driver talks to an [`ImportStore`] handle instead of the
//! database directly, so batch behavior (convergence, partial failure,
//! idempotent re-selection) is testable against an in-memory stub.

use std::sync::Arc;

use address_pipeline_database::queries;
use address_pipeline_models::{AddressRecord, FailedAddress, ImportStatus};
use async_trait::async_trait;
use switchy_database::Database;
use uuid::Uuid;

use crate::ImportError;

/// Storage operations the batch geocoder needs.
#[async_trait]
pub trait ImportStore: Send + Sync {
    /// Selects up to `limit` unattempted, coordinate-less addresses of a
    /// list.
    async fn select_unresolved(
        &self,
        list_id: Uuid,
        limit: u32,
    ) -> Result<Vec<AddressRecord>, ImportError>;

    /// Persists resolved coordinates for one address.
    async fn set_coordinates(
        &self,
        address_id: i64,
        lat: f64,
        lng: f64,
    ) -> Result<(), ImportError>;

    /// Marks addresses as attempted without coordinates.
    async fn mark_attempted(&self, address_ids: &[i64]) -> Result<(), ImportError>;

    /// Appends entries to the list's failure log.
    async fn append_failures(
        &self,
        list_id: Uuid,
        entries: &[FailedAddress],
    ) -> Result<(), ImportError>;

    /// Counts the list's remaining unattempted, coordinate-less
    /// addresses.
    async fn count_unresolved(&self, list_id: Uuid) -> Result<u64, ImportError>;

    /// Moves the list to `status` (forward-only).
    async fn set_status(&self, list_id: Uuid, status: ImportStatus) -> Result<(), ImportError>;
}

/// Production [`ImportStore`] backed by the Postgres query layer.
pub struct DbImportStore {
    db: Arc<dyn Database>,
}

impl DbImportStore {
    /// Wraps a database handle.
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ImportStore for DbImportStore {
    async fn select_unresolved(
        &self,
        list_id: Uuid,
        limit: u32,
    ) -> Result<Vec<AddressRecord>, ImportError> {
        Ok(queries::select_unresolved(self.db.as_ref(), list_id, limit).await?)
    }

    async fn set_coordinates(
        &self,
        address_id: i64,
        lat: f64,
        lng: f64,
    ) -> Result<(), ImportError> {
        Ok(queries::set_coordinates(self.db.as_ref(), address_id, lat, lng).await?)
    }

    async fn mark_attempted(&self, address_ids: &[i64]) -> Result<(), ImportError> {
        queries::mark_geocode_attempted(self.db.as_ref(), address_ids).await?;
        Ok(())
    }

    async fn append_failures(
        &self,
        list_id: Uuid,
        entries: &[FailedAddress],
    ) -> Result<(), ImportError> {
        Ok(queries::append_failed_addresses(self.db.as_ref(), list_id, entries).await?)
    }

    async fn count_unresolved(&self, list_id: Uuid) -> Result<u64, ImportError> {
        Ok(queries::count_unresolved(self.db.as_ref(), list_id).await?)
    }

    async fn set_status(&self, list_id: Uuid, status: ImportStatus) -> Result<(), ImportError> {
        Ok(queries::update_list_status(self.db.as_ref(), list_id, status).await?)
    }
}
