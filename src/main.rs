use legisrec::config::Settings;
use legisrec::services::ServiceContainer;
use legisrec::{database, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before logging so LOG_DIR applies.
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("LOG_DIR").ok().map(std::path::PathBuf::from);
    let _log_guard = logging::init(log_dir.as_deref());

    let settings = Settings::from_env()?;

    if let Some(parent) = database_file_parent(&settings.database_url) {
        tokio::fs::create_dir_all(&parent).await.ok();
    }

    // Initialize database pools and run migrations.
    let pool = database::init_pool(&settings.database_url).await?;
    database::run_migrations(&pool).await?;
    let write_pool = database::init_write_pool(&settings.database_url).await?;

    let container = ServiceContainer::build(&settings, pool, write_pool)?;
    container.start();

    tracing::info!("legisrec started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    container.shutdown().await;

    Ok(())
}

/// Parent directory of a `sqlite:path?params` database URL, if it names a
/// file.
fn database_file_parent(database_url: &str) -> Option<std::path::PathBuf> {
    let path = database_url.strip_prefix("sqlite:")?;
    let path = path.split('?').next()?;
    if path.is_empty() || path.starts_with(':') {
        return None;
    }
    std::path::Path::new(path).parent().map(|p| p.to_path_buf())
}
