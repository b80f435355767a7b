#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the address import pipeline.
//!
//! Exposes column mapping analysis, row import, single-address
//! geocoding, and the batch geocode step trigger. Batch continuations
//! run on the in-process geocode queue, so one `POST .../geocode` is
//! enough to drive a list to completion.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use address_pipeline_database::{db, run_migrations};
use address_pipeline_importer::geocode::{AddressResolver, TieredResolver};
use address_pipeline_importer::queue::GeocodeQueue;
use address_pipeline_importer::store::{DbImportStore, ImportStore};
use switchy_database::Database;

/// Shared application state.
pub struct AppState {
    /// Database connection.
    pub db: Arc<dyn Database>,
    /// Batch geocoder's persistence handle.
    pub store: Arc<dyn ImportStore>,
    /// Two-tier address resolver.
    pub resolver: Arc<dyn AddressResolver>,
    /// Continuation queue for batch geocoding.
    pub queue: GeocodeQueue,
}

/// Starts the API server.
///
/// Connects to the database, runs migrations, starts the geocode queue
/// worker, and binds the HTTP server. This is a regular async function —
/// the caller provides the async runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind
/// or encounters a runtime error.
///
/// # Panics
///
/// Panics if the database connection, migrations, or the HTTP client
/// fail to initialize.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Connecting to database...");
    let db_conn = db::connect_from_env()
        .await
        .expect("Failed to connect to database");

    log::info!("Running migrations...");
    run_migrations(db_conn.as_ref())
        .await
        .expect("Failed to run migrations");

    let db: Arc<dyn Database> = Arc::from(db_conn);
    let store: Arc<dyn ImportStore> = Arc::new(DbImportStore::new(db.clone()));
    let resolver: Arc<dyn AddressResolver> = Arc::new(TieredResolver::new(
        address_pipeline_importer::http_client().expect("Failed to build HTTP client"),
    ));

    log::info!("Starting geocode queue worker...");
    let queue = GeocodeQueue::start(store.clone(), resolver.clone());

    let state = web::Data::new(AppState {
        db,
        store,
        resolver,
        queue,
    });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(handlers::health))
                    .route(
                        "/import-lists/analyze",
                        web::post().to(handlers::analyze_columns),
                    )
                    .route(
                        "/import-lists/{id}/import",
                        web::post().to(handlers::import_list_rows),
                    )
                    .route(
                        "/import-lists/{id}/geocode",
                        web::post().to(handlers::geocode_batch),
                    )
                    .route("/import-lists", web::get().to(handlers::import_lists))
                    .route("/geocode", web::post().to(handlers::geocode_single)),
            )
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
