//! Service binary: wire config → store → provider → service, run until
//! interrupted, then stop the loops gracefully.

use std::path::PathBuf;
use std::sync::Arc;

use atmosguard::{MonitorConfig, MonitoringService, OpenDataProvider};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    if let Err(e) = run(&config_path).await {
        log::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(config_path: &std::path::Path) -> Result<(), atmosguard::MonitorError> {
    let config = Arc::new(MonitorConfig::load(config_path)?);
    let store = Arc::new(atmosguard::db::SnapshotDb::open_at(config.db_path())?);
    let provider = Arc::new(OpenDataProvider::new(&config.provider));

    let service = MonitoringService::new(config, store, provider);
    service.start();
    log::info!("AtmosGuard running; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    log::info!("Stop signal received, shutting down loops");
    service.stop().await;

    Ok(())
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".atmosguard")
        .join("config.json")
}
