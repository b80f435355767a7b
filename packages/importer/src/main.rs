#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the address import tool.

use std::path::PathBuf;
use std::sync::Arc;

use address_pipeline_database::{db, run_migrations};
use address_pipeline_importer::{
    AnalyzeRequest, analyze, csv_file, drive_geocoding, interactive, print_lists, run_import,
};
use clap::{Parser, Subcommand};
use switchy_database::Database;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "address_pipeline_importer", about = "Address list import tool")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Analyze a file's columns without importing
    Analyze {
        /// Path to the CSV file
        file: PathBuf,
        /// Upstream provider ID (enables saved-mapping reuse)
        #[arg(long)]
        provider: Option<String>,
    },
    /// Import an address list and geocode it
    Import {
        /// Path to the CSV file
        file: PathBuf,
        /// Upstream provider ID (enables saved-mapping reuse)
        #[arg(long)]
        provider: Option<String>,
    },
    /// Geocode the missing coordinates of an existing list
    Geocode {
        /// Import list ID
        list_id: Uuid,
    },
    /// Show all import lists
    Lists,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        return interactive::run().await;
    };

    match command {
        Commands::Migrate => {
            log::info!("Running database migrations...");
            let db = db::connect_from_env().await?;
            run_migrations(db.as_ref()).await?;
            log::info!("Migrations complete.");
        }
        Commands::Analyze { file, provider } => {
            let db = db::connect_from_env().await?;
            run_migrations(db.as_ref()).await?;

            let (headers, rows) = csv_file::read_csv(&file)?;
            let response = analyze(
                db.as_ref(),
                &AnalyzeRequest {
                    csv_headers: headers,
                    sample_rows: rows.into_iter().take(5).collect(),
                    provider_id: provider,
                },
            )
            .await?;
            interactive::print_analysis(&response);
        }
        Commands::Import { file, provider } => {
            let db: Arc<dyn Database> = Arc::from(db::connect_from_env().await?);
            run_migrations(db.as_ref()).await?;
            run_import(db, &file, provider).await?;
        }
        Commands::Geocode { list_id } => {
            let db: Arc<dyn Database> = Arc::from(db::connect_from_env().await?);
            run_migrations(db.as_ref()).await?;
            drive_geocoding(db, list_id).await?;
        }
        Commands::Lists => {
            let db = db::connect_from_env().await?;
            print_lists(db.as_ref()).await?;
        }
    }

    Ok(())
}
