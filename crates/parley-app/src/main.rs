//! Parley application binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Open the record database and start the feedback writer
//! 3. Build the session store and the turn processor for the chosen backend
//! 4. Start the session expiry sweeper
//! 5. Serve the axum API until Ctrl-C

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinHandle;

use parley_api::state::AppState;
use parley_chat::{
    AnswerGenerator, FeedbackSink, OpenAiGenerator, OpenAiTranslator, ScriptedGenerator,
    SessionStore, TranslationService, TurnProcessor,
};
use parley_core::config::ParleyConfig;
use parley_storage::{Database, RecordRepository};

use crate::cli::CliArgs;

/// How long shutdown waits for queued records to reach the database.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

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

/// RUST_LOG wins over the configured level.
fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

fn build_generator(
    config: &ParleyConfig,
) -> Result<Arc<dyn AnswerGenerator>, Box<dyn std::error::Error>> {
    match config.backend.kind.as_str() {
        "openai" => {
            let generator = OpenAiGenerator::from_config(&config.backend)?;
            tracing::info!(model = %generator.model(), "OpenAI generation backend ready");
            Ok(Arc::new(generator))
        }
        _ => {
            tracing::info!("Using scripted generation backend");
            Ok(Arc::new(ScriptedGenerator::new()))
        }
    }
}

/// Translation is only available with a remote backend; otherwise the
/// endpoint echoes the input with `translated: false`.
fn build_translator(config: &ParleyConfig) -> TranslationService {
    if config.backend.kind != "openai" {
        return TranslationService::disabled();
    }
    match OpenAiTranslator::from_config(&config.backend) {
        Ok(translator) => TranslationService::new(Arc::new(translator)),
        Err(e) => {
            tracing::warn!(error = %e, "Translation backend unavailable; translations disabled");
            TranslationService::disabled()
        }
    }
}

/// Periodically drop sessions idle for longer than `ttl`.
fn spawn_session_sweeper(
    store: Arc<SessionStore>,
    ttl: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = every.as_secs(), "Session sweeper started");
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = store.sweep_expired(ttl);
            if removed > 0 {
                tracing::info!(removed, remaining = store.len(), "Expired sessions swept");
            } else {
                tracing::debug!(remaining = store.len(), "Session sweep found nothing to evict");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config. A missing file means defaults; a broken one is fatal.
    let config_file = args.resolve_config_path();
    let file_exists = config_file.exists();
    let mut config = if file_exists {
        ParleyConfig::load(&config_file)?
    } else {
        ParleyConfig::default()
    };
    args.apply_overrides(&mut config);

    init_tracing(&config.general.log_level);
    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    if file_exists {
        tracing::info!(path = %config_file.display(), "Configuration loaded");
    } else {
        tracing::info!(path = %config_file.display(), "No configuration file; using defaults");
    }
    config.validate()?;

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join(&config.feedback.database_file);
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let repository = RecordRepository::new(db);
    let (sink, writer) = FeedbackSink::spawn(Arc::new(repository), config.feedback.queue_capacity);

    // Chat engine.
    let generator = build_generator(&config)?;
    let translator = build_translator(&config);
    let store = Arc::new(SessionStore::new(config.session.ttl()));
    let processor = TurnProcessor::new(
        Arc::clone(&store),
        generator,
        config.chat.clone(),
        config.session.context_messages,
    );
    tracing::info!(
        ttl_minutes = config.session.ttl_minutes,
        context_messages = config.session.context_messages,
        "Chat engine ready"
    );

    let sweeper = spawn_session_sweeper(
        Arc::clone(&store),
        config.session.ttl(),
        config.session.sweep_interval(),
    );

    // === API server ===

    let state = AppState::new(config.clone(), processor, sink, translator);
    let served = parley_api::start_server(&config, state, shutdown_signal()).await;
    sweeper.abort();

    // Dropping the router closed the record queue; let the writer drain it.
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        tracing::warn!("Record writer did not finish before shutdown timeout");
    }

    if let Err(e) = served {
        tracing::error!(
            host = %config.general.host,
            port = config.general.port,
            error = %e,
            "API server failed"
        );
        tracing::error!("Try: PARLEY_PORT={} parley", config.general.port.wrapping_add(1));
        return Err(e.into());
    }

    tracing::info!("Parley stopped");
    Ok(())
}
