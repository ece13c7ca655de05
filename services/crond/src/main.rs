//! cronspool crontab daemon
//!
//! Watches the account spool, the drop-in spool and the system crontab,
//! and keeps the live job database in sync with them.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};

use cronspool_daemon::config::Config;
use cronspool_daemon::{
    logging, CrontabParser, HostFs, LiveDatabase, PasswdResolver, Reconciler, ReconcilerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    logging::init(&config.log_level)?;

    info!("Starting cronspool daemon");
    info!(
        system_crontab = %config.layout.system_crontab.display(),
        spools = config.layout.spools.len(),
        reload_interval_secs = config.reload_interval.as_secs(),
        "Configuration loaded"
    );

    let reconciler = Arc::new(Reconciler::new(
        config.layout.clone(),
        Arc::new(HostFs),
        Arc::new(PasswdResolver),
        CrontabParser::new(config.max_crontab_bytes),
    ));
    let live = Arc::new(LiveDatabase::new());

    // Initial load before the first tick so the database is populated at startup.
    {
        let reconciler = Arc::clone(&reconciler);
        let live = Arc::clone(&live);
        tokio::task::spawn_blocking(move || live.refresh(&reconciler)).await?;
    }
    info!(principals = live.load().len(), "Initial job database loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut reconciler_handle = tokio::spawn({
        let live = Arc::clone(&live);
        let reconciler_config = ReconcilerConfig {
            reconcile_interval: config.reload_interval,
        };
        async move {
            reconciler.run(live, reconciler_config, shutdown_rx).await;
        }
    });

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            false
        }
        result = &mut reconciler_handle => {
            if let Err(e) = result {
                error!(error = %e, "Reconciler task panicked");
            }
            true
        }
    };

    let _ = shutdown_tx.send(true);
    if !finished {
        if let Err(e) = reconciler_handle.await {
            error!(error = %e, "Reconciler task panicked");
        }
    }

    info!("cronspool daemon shutdown complete");
    Ok(())
}
