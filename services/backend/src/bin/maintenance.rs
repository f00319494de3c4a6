//! services/backend/src/bin/maintenance.rs
//!
//! Operator commands run against the production store: repairing drifted profile
//! statistics and pruning the activity log.

use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};
use backend_lib::{
    adapters::{LocalBlobStore, OpenAiFlashcardAdapter, PgDocumentStore, SessionTokenVerifier},
    config::Config,
    error::BackendError,
};
use clap::{Parser, Subcommand};
use notenest_core::store::{collections, Query};
use notenest_core::{BlobStore, DocumentStore, NoteNest};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// NoteNest maintenance tasks
#[derive(Parser)]
#[command(name = "maintenance", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute the derived statistics of the given users
    Reconcile {
        #[arg(required = true)]
        user_ids: Vec<String>,
    },
    /// Recompute the derived statistics of every user with a profile
    ReconcileAll,
    /// Delete activity entries older than the retention window
    PruneActivity,
}

/// Reconciles each user in turn. Failures are logged and counted, not fatal.
async fn reconcile(app: &NoteNest, user_ids: &[String]) -> usize {
    let mut failed = 0;
    for user_id in user_ids {
        match app.profiles.fix_user_stats(user_id).await {
            Ok(counters) => info!(
                %user_id,
                notes = counters.total_notes_uploaded,
                reviews_given = counters.total_reviews_given,
                reviews_received = counters.total_reviews_received,
                reports = counters.reports_submitted,
                "Reconciled"
            ),
            Err(e) => {
                error!(%user_id, "Reconciliation failed: {}", e);
                failed += 1;
            }
        }
    }
    failed
}

#[tokio::main]
async fn main() -> Result<(), BackendError> {
    let cli = Cli::parse();

    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded.");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgDocumentStore::new(db_pool, config.in_query_limit));
    store.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(config.blob_root.clone()));
    let openai_config = match &config.openai_api_key {
        Some(key) => OpenAIConfig::new().with_api_key(key),
        None => OpenAIConfig::new(),
    };
    let flashcards = Arc::new(OpenAiFlashcardAdapter::new(
        Client::with_config(openai_config),
        config.flashcard_model.clone(),
        blobs.clone(),
    ));
    let verifier = Arc::new(SessionTokenVerifier::new(store.clone()));
    let app = NoteNest::new(store.clone(), blobs, verifier, flashcards, config.to_policy());

    // --- 4. Run the Command ---
    match cli.command {
        Commands::Reconcile { user_ids } => {
            let failed = reconcile(&app, &user_ids).await;
            if failed > 0 {
                return Err(BackendError::Internal(format!(
                    "{} of {} users could not be reconciled",
                    failed,
                    user_ids.len()
                )));
            }
        }
        Commands::ReconcileAll => {
            let profiles = store.query(&Query::new(collections::USER_PROFILES)).await?;
            let user_ids: Vec<String> = profiles.into_iter().map(|doc| doc.id).collect();
            info!(users = user_ids.len(), "Reconciling every profile");
            let failed = reconcile(&app, &user_ids).await;
            if failed > 0 {
                return Err(BackendError::Internal(format!(
                    "{} of {} users could not be reconciled",
                    failed,
                    user_ids.len()
                )));
            }
        }
        Commands::PruneActivity => {
            let removed = app.prune_activity().await?;
            info!(removed, "Activity prune complete");
        }
    }

    Ok(())
}
