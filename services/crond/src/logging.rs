//! Logging initialization and the audit event sink.

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing target for audit events, so they can be filtered separately.
pub const AUDIT_TARGET: &str = "cronspool::audit";

/// How loudly an audit event is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Expected state changes (reloads).
    Notice,
    /// A file or directory was refused or could not be read.
    Warning,
}

/// Initialize JSON logging (prefer RUST_LOG, fall back to `level`).
pub fn init(level: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()?;
    Ok(())
}

/// Record an audit event.
///
/// `subject` is the crontab's display name (or `CRON` for daemon-wide
/// events), `reason` a stable upper-case tag, `detail` usually the path.
/// Never fails.
pub fn log_event(severity: Severity, subject: &str, reason: &str, detail: &str) {
    let pid = std::process::id();
    match severity {
        Severity::Notice => info!(target: AUDIT_TARGET, subject, pid, reason, detail, "crontab event"),
        Severity::Warning => warn!(target: AUDIT_TARGET, subject, pid, reason, detail, "crontab event"),
    }
}
