//! hrdesk - command-line client for the HR backend.
//!
//! Signs in, keeps the session in the OS keychain, gates access behind an
//! optional PIN, and sends authenticated requests to the API.

mod commands;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hrdesk_core::auth::{KeyringSecretStore, NoBiometrics};
use hrdesk_core::{ApiClient, Config, SessionStore};

/// Set to a directory (or empty for the default cache location) to also
/// write daily log files
const ENV_LOG_DIR: &str = "HRDESK_LOG_DIR";

const LOG_FILE_PREFIX: &str = "hrdesk.log";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_dir = std::env::var(ENV_LOG_DIR).ok().and_then(|dir| {
        if dir.trim().is_empty() {
            Config::log_dir().ok()
        } else {
            Some(PathBuf::from(dir))
        }
    });

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        commands::print_usage();
        return Ok(());
    };
    if matches!(command, "help" | "--help" | "-h") {
        commands::print_usage();
        return Ok(());
    }

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    info!(api = %config.api_base_url, "hrdesk starting");

    let session = Arc::new(SessionStore::new(
        Arc::new(KeyringSecretStore::new()),
        Arc::new(NoBiometrics),
    ));
    let client = ApiClient::new(&config, session)?;
    client.bootstrap().await;

    if let Err(e) = commands::run(command, &args[1..], &client, &mut config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
