use std::sync::Arc;

use founder_intake::cli::{HELP, WizardRepl};
use founder_intake::config::{ServerConfig, WizardConfig};
use founder_intake::records::{HttpRecordClient, record_routes};
use founder_intake::store::{FileCache, LibSqlBackend, RecordStore, SessionStore};
use founder_intake::wizard::WizardManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mode = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    eprintln!("🧭 Founder Intake v{}", env!("CARGO_PKG_VERSION"));

    match mode.as_str() {
        "serve" => Ok(serve().await?),
        "wizard" => Ok(wizard().await?),
        other => {
            eprintln!("Error: unknown mode '{other}'");
            eprintln!("  usage: founder-intake [serve|wizard]");
            std::process::exit(2);
        }
    }
}

/// Run the record server.
async fn serve() -> founder_intake::error::Result<()> {
    let config = ServerConfig::from_env();

    let backend = LibSqlBackend::new_local(&config.db_path)
        .await
        .inspect_err(|e| {
            tracing::error!(path = %config.db_path.display(), error = %e, "Failed to open database");
        })?;
    let store: Arc<dyn RecordStore> = Arc::new(backend);

    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Record API: http://0.0.0.0:{}/api", config.port);

    let app = record_routes(store);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Record server started");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Run the interactive wizard against a record server.
async fn wizard() -> anyhow::Result<()> {
    let config = WizardConfig::from_env()?;

    let records: Arc<dyn RecordStore> =
        Arc::new(HttpRecordClient::new(&config.server_url, config.http_timeout)?);
    let sessions = Arc::new(SessionStore::new(Arc::new(FileCache::new(&config.cache_path))));
    let manager = Arc::new(WizardManager::new(records, sessions));

    eprintln!("   Record server: {}", config.server_url);
    eprintln!("   Session cache: {}", config.cache_path.display());
    eprintln!("{HELP}\n");

    WizardRepl::new(manager).run().await?;
    Ok(())
}
