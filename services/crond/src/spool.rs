//! Spool layout and enumeration.
//!
//! A spool is a directory whose immediate children are crontabs. Two kinds
//! are configured by default:
//!
//! - the account spool, where each file is named after the account it
//!   belongs to
//! - the drop-in spool (`/etc/cron.d`), populated by administrators and
//!   packages, whose files are system crontabs
//!
//! The singular system crontab (`/etc/crontab`) is enumerated first.

use std::path::PathBuf;
use std::sync::Arc;

use cronspool_jobdb::{Timestamp, SYSTEM_PRINCIPAL};
use tracing::debug;

use crate::fs::Filesystem;
use crate::logging::{log_event, Severity};

/// Principal owning every system crontab.
pub const ROOT_PRINCIPAL: &str = "root";

/// Who a candidate crontab claims to belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// An account crontab; the name must resolve to a real account.
    Account(String),
    /// A system crontab; no account lookup, stricter owner rules.
    System,
}

/// A discovered crontab, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub claim: Claim,
    /// Name used in logs and as the database key.
    pub display_name: String,
    pub path: PathBuf,
}

/// One spool directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolDescriptor {
    pub path: PathBuf,
    /// Fixed principal for every file in the spool. Spools with a fixed
    /// principal hold system crontabs.
    pub principal: Option<String>,
    /// Fixed display name for every file; defaults to the file name.
    pub display_name: Option<String>,
}

impl SpoolDescriptor {
    /// Per-account spool: principal and display name come from the file name.
    pub fn account(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            principal: None,
            display_name: None,
        }
    }

    /// Drop-in spool of system crontabs owned by root.
    pub fn drop_in(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            principal: Some(ROOT_PRINCIPAL.to_string()),
            display_name: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.principal.is_some()
    }

    /// Whether a directory entry is considered at all.
    ///
    /// Account spool: skip dot files (covers `.` and `..`). System spools:
    /// skip anything containing a dot or ending in `~`, which also catches
    /// editor backups and package manager leftovers.
    pub fn accepts_name(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        if self.is_system() {
            !name.contains('.') && !name.ends_with('~')
        } else {
            !name.starts_with('.')
        }
    }

    fn candidate(&self, name: &str) -> Candidate {
        let claim = if self.is_system() {
            Claim::System
        } else {
            Claim::Account(name.to_string())
        };
        Candidate {
            claim,
            display_name: self.display_name.clone().unwrap_or_else(|| name.to_string()),
            path: self.path.join(name),
        }
    }
}

/// Everything the enumerator watches. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolLayout {
    pub system_crontab: PathBuf,
    /// Enumerated in declaration order.
    pub spools: Vec<SpoolDescriptor>,
}

impl SpoolLayout {
    /// The classic layout: account spool, then drop-in spool.
    pub fn standard(
        system_crontab: impl Into<PathBuf>,
        account_spool: impl Into<PathBuf>,
        drop_in_spool: impl Into<PathBuf>,
    ) -> Self {
        Self {
            system_crontab: system_crontab.into(),
            spools: vec![
                SpoolDescriptor::account(account_spool),
                SpoolDescriptor::drop_in(drop_in_spool),
            ],
        }
    }
}

/// Timestamps gathered for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// System crontab mtime; `ZERO` when the file is absent.
    pub system: Timestamp,
    /// Max of the system crontab and every spool directory mtime.
    pub aggregate: Timestamp,
}

/// Walks a [`SpoolLayout`].
pub struct SpoolEnumerator {
    layout: SpoolLayout,
    fs: Arc<dyn Filesystem>,
}

impl SpoolEnumerator {
    pub fn new(layout: SpoolLayout, fs: Arc<dyn Filesystem>) -> Self {
        Self { layout, fs }
    }

    pub fn layout(&self) -> &SpoolLayout {
        &self.layout
    }

    /// Stat the system crontab and each spool directory.
    pub fn snapshot(&self) -> Snapshot {
        let system = self
            .fs
            .stat(&self.layout.system_crontab)
            .map(|s| s.mtime)
            .unwrap_or(Timestamp::ZERO);

        let aggregate = self
            .layout
            .spools
            .iter()
            .filter_map(|spool| self.fs.stat(&spool.path).ok())
            .map(|s| s.mtime)
            .fold(system, Timestamp::max);

        Snapshot { system, aggregate }
    }

    pub fn system_candidate(&self) -> Candidate {
        Candidate {
            claim: Claim::System,
            display_name: SYSTEM_PRINCIPAL.to_string(),
            path: self.layout.system_crontab.clone(),
        }
    }

    /// Candidates from every spool, in declaration then directory order.
    pub fn spool_candidates(&self) -> Vec<Candidate> {
        let mut out = Vec::new();
        for spool in &self.layout.spools {
            self.scan(spool, &mut out);
        }
        out
    }

    fn scan(&self, spool: &SpoolDescriptor, out: &mut Vec<Candidate>) {
        let names = match self.fs.read_dir(&spool.path) {
            Ok(names) => names,
            Err(e) => {
                if spool.is_system() {
                    log_event(
                        Severity::Warning,
                        "CRON",
                        "OPENDIR FAILED",
                        &spool.path.display().to_string(),
                    );
                }
                debug!(path = %spool.path.display(), error = %e, "skipping spool");
                return;
            }
        };

        for name in names {
            let Some(name) = name.to_str() else {
                debug!(spool = %spool.path.display(), name = ?name, "skipping non-UTF-8 name");
                continue;
            };
            if !spool.accepts_name(name) {
                continue;
            }
            out.push(spool.candidate(name));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::HostFs;
    use rstest::rstest;
    use std::fs;
    use tempfile::tempdir;

    #[rstest]
    #[case("alice", true)]
    #[case(".", false)]
    #[case("..", false)]
    #[case(".alice", false)]
    #[case("alice.bak", true)]
    #[case("alice~", true)]
    #[case("", false)]
    fn test_account_filter(#[case] name: &str, #[case] accepted: bool) {
        assert_eq!(SpoolDescriptor::account("/s").accepts_name(name), accepted);
    }

    #[rstest]
    #[case("logrotate", true)]
    #[case("php-sessions", true)]
    #[case(".", false)]
    #[case("..", false)]
    #[case("foo.bak", false)]
    #[case("foo.dpkg-dist", false)]
    #[case(".placeholder", false)]
    #[case("foo~", false)]
    #[case("", false)]
    fn test_drop_in_filter(#[case] name: &str, #[case] accepted: bool) {
        assert_eq!(SpoolDescriptor::drop_in("/d").accepts_name(name), accepted);
    }

    #[test]
    fn test_candidates_from_each_spool() {
        let dir = tempdir().unwrap();
        let users = dir.path().join("crontabs");
        let dropin = dir.path().join("cron.d");
        fs::create_dir(&users).unwrap();
        fs::create_dir(&dropin).unwrap();
        fs::write(users.join("alice"), "").unwrap();
        fs::write(users.join(".swp"), "").unwrap();
        fs::write(dropin.join("backup"), "").unwrap();
        fs::write(dropin.join("backup.bak"), "").unwrap();

        let layout = SpoolLayout::standard(dir.path().join("crontab"), &users, &dropin);
        let spools = SpoolEnumerator::new(layout, Arc::new(HostFs));
        let candidates = spools.spool_candidates();

        assert_eq!(
            candidates,
            vec![
                Candidate {
                    claim: Claim::Account("alice".into()),
                    display_name: "alice".into(),
                    path: users.join("alice"),
                },
                Candidate {
                    claim: Claim::System,
                    display_name: "backup".into(),
                    path: dropin.join("backup"),
                },
            ]
        );
    }

    #[test]
    fn test_fixed_display_name() {
        let spool = SpoolDescriptor {
            path: PathBuf::from("/etc/cron.d"),
            principal: Some(ROOT_PRINCIPAL.to_string()),
            display_name: Some("*system*".to_string()),
        };
        let c = spool.candidate("job");
        assert_eq!(c.display_name, "*system*");
        assert_eq!(c.path, PathBuf::from("/etc/cron.d/job"));
        assert_eq!(c.claim, Claim::System);
    }

    #[test]
    fn test_missing_spools_are_skipped() {
        let dir = tempdir().unwrap();
        let layout = SpoolLayout::standard(
            dir.path().join("crontab"),
            dir.path().join("nope"),
            dir.path().join("also-nope"),
        );
        let spools = SpoolEnumerator::new(layout, Arc::new(HostFs));

        assert!(spools.spool_candidates().is_empty());
        let snap = spools.snapshot();
        assert_eq!(snap.system, Timestamp::ZERO);
        assert_eq!(snap.aggregate, Timestamp::ZERO);
    }

    #[test]
    fn test_snapshot_takes_max() {
        let dir = tempdir().unwrap();
        let users = dir.path().join("crontabs");
        fs::create_dir(&users).unwrap();
        let system = dir.path().join("crontab");
        fs::write(&system, "").unwrap();

        let old = Timestamp::new(1_000_000, 1).to_system_time();
        let new = Timestamp::new(1_000_000, 2).to_system_time();
        fs::File::open(&system).unwrap().set_modified(new).unwrap();
        fs::File::open(&users).unwrap().set_modified(old).unwrap();

        let layout = SpoolLayout::standard(&system, &users, dir.path().join("cron.d"));
        let snap = SpoolEnumerator::new(layout, Arc::new(HostFs)).snapshot();

        assert_eq!(snap.system, Timestamp::new(1_000_000, 2));
        assert_eq!(snap.aggregate, Timestamp::new(1_000_000, 2));
    }
}
