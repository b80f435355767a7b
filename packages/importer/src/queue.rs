//! Continuation queue for batch geocoding.
//!
//! Batch steps do not invoke themselves over the network; continuation
//! is an explicit task enqueued here and drained by a worker, so job
//! progression is observable and at-least-once. Enqueueing never rolls
//! back the current step's committed work — a lost continuation is
//! logged and can be recovered by enqueueing the list again.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::geocode::{AddressResolver, geocode_step};
use crate::store::ImportStore;

/// Handle to the geocoding work queue.
#[derive(Clone)]
pub struct GeocodeQueue {
    tx: mpsc::UnboundedSender<Uuid>,
}

impl GeocodeQueue {
    /// Starts the worker task draining batch steps.
    ///
    /// The worker runs until every queue handle is dropped. Step errors
    /// are logged and do not kill the worker; since work selection is
    /// idempotent, re-enqueueing the list retries cleanly.
    #[must_use]
    pub fn start(store: Arc<dyn ImportStore>, resolver: Arc<dyn AddressResolver>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Uuid>();
        let queue = Self { tx };

        let worker_queue = queue.clone();
        tokio::spawn(async move {
            while let Some(list_id) = rx.recv().await {
                match geocode_step(
                    store.as_ref(),
                    resolver.as_ref(),
                    Some(&worker_queue),
                    list_id,
                )
                .await
                {
                    Ok(outcome) => log::info!("List {list_id}: {}", outcome.message),
                    Err(e) => log::error!("List {list_id}: batch step failed: {e}"),
                }
            }
        });

        queue
    }

    /// Enqueues the next batch step for a list. Fire-and-forget: a send
    /// failure (worker gone) is logged, never propagated.
    pub fn enqueue(&self, list_id: Uuid) {
        if self.tx.send(list_id).is_err() {
            log::error!("Geocode queue worker is gone; continuation for list {list_id} was lost");
        }
    }
}
