use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::config::Settings;
use crate::core::lifecycle::LifecycleManager;
use crate::core::terminal::{GuideSection, print_goodbye};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging::init_tracing;

pub async fn run_server(settings: Settings, api_host: String, api_port: u16) -> Result<()> {
    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);
    init_tracing(settings.tracing_level(), log_tx.clone(), false);

    info!("Starting agent manager (data dir: {})", settings.data_dir.display());
    let manager = super::build_manager(&settings).await?;

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(manager.clone())));
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(ApiServerConfig {
        manager,
        log_tx,
        api_host: api_host.clone(),
        api_port,
    }))));
    lifecycle.start().await?;

    GuideSection::new("Agent Manager")
        .status("API", &format!("http://{}:{}/api", api_host, api_port))
        .status("Logs", &format!("http://{}:{}/api/logs", api_host, api_port))
        .blank()
        .text("Press Ctrl+C to stop.")
        .print();
    println!();

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await?;
    print_goodbye();
    Ok(())
}
