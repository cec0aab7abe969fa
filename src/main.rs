use anyhow::{Context, Result};
use flexi_logger::{FileSpec, Logger};
use std::sync::Arc;

use dolphie::monitor::ui::{self, Severity, UiEvent};
use dolphie::monitor::{load_host_cache_file, options, HostCache, TabManager};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Fatal configuration problems print a diagnostic and exit non-zero.
    let config = options::parse()?;

    // Override with RUST_LOG
    let logger = Logger::try_with_env_or_str("info").context("Could not create logger")?;
    if let Some(log_file) = &config.replay.daemon_mode_log_file {
        logger
            .log_to_file(FileSpec::try_from(log_file.clone())?)
            .start()
            .context("Failed to initialize logger")?;
    } else {
        logger
            .log_to_stderr()
            .start()
            .context("Failed to initialize logger")?;
    }

    let host_cache = Arc::new(HostCache::new(load_host_cache_file(
        &config.host_cache_file,
    )?));
    let (ui_tx, ui_rx) = ui::channel();

    let mut manager = TabManager::new(config.clone(), ui_tx, host_cache.clone());
    if config.hostgroup_members.is_empty() {
        let endpoint = config.endpoint.clone();
        manager.create_tab(endpoint.address(), endpoint);
    } else {
        manager.connect_hostgroup();
    }

    // The widget layer consumes this stream in interactive builds; running
    // headless (daemon mode included) everything lands in the log.
    std::thread::spawn(move || {
        for event in ui_rx {
            match event {
                UiEvent::Notify { tab_id, notification } => {
                    let line = format!(
                        "[tab {}] {}: {}",
                        tab_id,
                        notification.title,
                        notification.message.replace('\n', " ")
                    );
                    match notification.severity {
                        Severity::Info => log::info!("{}", line),
                        Severity::Warning => log::warn!("{}", line),
                        Severity::Error => log::error!("{}", line),
                    }
                }
                UiEvent::ConnectionStatusChanged { tab_id, status } => {
                    log::info!("[tab {}] connection status: {}", tab_id, status);
                }
                UiEvent::SetupRequired { tab_id, error } => {
                    log::error!("[tab {}] connection failed: {}", tab_id, error);
                }
                UiEvent::Refreshed { .. } => {}
                UiEvent::CommandOutput { tab_id, title, rows } => {
                    log::info!("[tab {}] {} ({} rows)", tab_id, title, rows.len());
                }
            }
        }
    });

    log::info!("dolphie started");
    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    drop(manager);
    if let Err(error) = host_cache.persist(&config.host_cache_file) {
        log::warn!("Cannot persist host cache: {}", error);
    }

    return Ok(());
}
