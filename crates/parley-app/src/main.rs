//! Parley application binary - composition root.
//!
//! 1. Parse CLI flags and load configuration (file, env, flags)
//! 2. Initialize tracing
//! 3. Open the SQLite database holding the turn index and conversation log
//! 4. Build the search and model clients
//! 5. Start the axum REST API server

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use parley_api::auth;
use parley_api::state::AppState;
use parley_chat::{HttpModelClient, HttpSearchClient};
use parley_core::config::ParleyConfig;
use parley_storage::{ConversationLogRepository, Database, SessionIndexRepository, TableNames};

use crate::cli::CliArgs;

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = ParleyConfig::load_or_default(&config_file);
    config.apply_env();
    args.apply_to(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    config.validate()?;

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let db_path = data_dir.join(&config.storage.database_file);
    let db = Arc::new(Database::new(
        &db_path,
        TableNames::from_config(&config.storage),
    )?);
    tracing::info!(
        path = %db_path.display(),
        index_table = %config.storage.index_table,
        conversation_table = %config.storage.conversation_table,
        "SQLite database opened"
    );

    // External services.
    let search = HttpSearchClient::from_config(&config)?;
    let model = HttpModelClient::from_config(&config)?;
    tracing::info!(
        retrieval = %config.retrieval_endpoint(),
        model = %config.model_endpoint(),
        model_id = %config.model.model_id,
        "Service clients ready"
    );
    if config.retrieval.index_id.is_empty() {
        tracing::warn!("No search index id configured; set KENDRA_INDEX_ID");
    }

    let token = auth::resolve_token(
        config.api.token.as_deref(),
        &data_dir.join(auth::TOKEN_FILE),
    );

    let state = AppState::new(
        config,
        Arc::new(SessionIndexRepository::new(Arc::clone(&db))),
        Arc::new(ConversationLogRepository::new(db)),
        Arc::new(search),
        Arc::new(model),
        token,
    );

    parley_api::start_server(state).await?;

    Ok(())
}
