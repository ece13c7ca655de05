//! Configuration for the crontab daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::parser::DEFAULT_MAX_BYTES;
use crate::spool::SpoolLayout;

pub const DEFAULT_SPOOL_DIR: &str = "/var/spool/cron/crontabs";
pub const DEFAULT_DROPIN_DIR: &str = "/etc/cron.d";
pub const DEFAULT_SYSTEM_CRONTAB: &str = "/etc/crontab";

/// Daemon configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Spools and the system crontab to watch.
    pub layout: SpoolLayout,

    /// Interval between reconciliation passes.
    pub reload_interval: Duration,

    /// Crontabs larger than this fail to parse.
    pub max_crontab_bytes: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let spool_dir = lookup("CRONSPOOL_SPOOL_DIR").unwrap_or_else(|| DEFAULT_SPOOL_DIR.into());
        let dropin_dir =
            lookup("CRONSPOOL_DROPIN_DIR").unwrap_or_else(|| DEFAULT_DROPIN_DIR.into());
        let system_crontab =
            lookup("CRONSPOOL_SYSTEM_CRONTAB").unwrap_or_else(|| DEFAULT_SYSTEM_CRONTAB.into());

        let reload_secs: u64 = lookup("CRONSPOOL_RELOAD_INTERVAL_SECS")
            .map(|v| v.parse())
            .transpose()
            .context("CRONSPOOL_RELOAD_INTERVAL_SECS must be an integer (seconds).")?
            .unwrap_or(60);
        let reload_interval = Duration::from_secs(reload_secs.max(1));

        let max_crontab_bytes: u64 = lookup("CRONSPOOL_MAX_CRONTAB_BYTES")
            .map(|v| v.parse())
            .transpose()
            .context("CRONSPOOL_MAX_CRONTAB_BYTES must be an integer (bytes).")?
            .unwrap_or(DEFAULT_MAX_BYTES);

        let log_level = lookup("CRONSPOOL_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            layout: SpoolLayout::standard(
                PathBuf::from(system_crontab),
                PathBuf::from(spool_dir),
                PathBuf::from(dropin_dir),
            ),
            reload_interval,
            max_crontab_bytes,
            log_level,
        })
    }
}
