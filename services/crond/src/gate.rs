//! Validated-file gate.
//!
//! Decides whether a candidate crontab may be trusted and, if so, hands back
//! an open descriptor for it. The check order matters:
//!
//! 1. resolve the claimed account (account files only)
//! 2. `lstat` the path: regular file, mode within the pre-open mask,
//!    exactly one link
//! 3. open with `O_NOFOLLOW | O_NONBLOCK`
//! 4. `fstat` the descriptor; everything after this trusts only fstat data
//! 5. regular file again, on the descriptor
//! 6. permission policy
//! 7. owner
//! 8. link count again (account files)
//! 9. `(dev, ino)` from step 2 equals `(dev, ino)` from step 4
//!
//! Any opened descriptor is closed before a rejection is returned.

use std::fs::File;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::fs::{FileStat, Filesystem};
use crate::logging::{log_event, Severity};
use crate::principal::{Principal, PrincipalResolver};
use crate::spool::{Candidate, Claim};

/// Uid that may own any crontab.
pub const SUPERUSER_UID: u32 = 0;

/// Why a candidate crontab was refused.
#[derive(Debug, Error)]
pub enum Rejection {
    /// Claimed account does not exist.
    #[error("no passwd entry for {0}")]
    Orphan(String),

    #[error("lstat failed: {0}")]
    Lstat(io::Error),

    /// Path is not a regular file (symlink, directory, fifo, ...).
    #[error("not a regular file")]
    NotRegular,

    #[error("link count is {0}, expected 1")]
    BadLinkCount(u64),

    #[error("open failed: {0}")]
    Open(io::Error),

    #[error("fstat failed: {0}")]
    Fstat(io::Error),

    /// The opened descriptor does not refer to a regular file.
    #[error("not a regular file after open")]
    NotRegularAfterOpen,

    #[error("file mode {0:04o} outside policy")]
    BadFileMode(u32),

    #[error("owned by uid {0}")]
    WrongOwner(u32),

    /// The path was swapped between lstat and open.
    #[error("file changed during open")]
    ChangedDuringOpen,
}

impl Rejection {
    /// Stable reason tag written to the audit log.
    pub fn reason_tag(&self) -> &'static str {
        match self {
            Rejection::Orphan(_) => "ORPHAN",
            Rejection::Lstat(_) => "CAN'T LSTAT",
            Rejection::NotRegular | Rejection::NotRegularAfterOpen => "NOT REGULAR",
            Rejection::BadLinkCount(_) => "BAD LINK COUNT",
            Rejection::Open(_) => "CAN'T OPEN",
            Rejection::Fstat(_) => "FSTAT FAILED",
            Rejection::BadFileMode(_) => "BAD FILE MODE",
            Rejection::WrongOwner(_) => "WRONG FILE OWNER",
            Rejection::ChangedDuringOpen => "FILE CHANGED DURING OPEN",
        }
    }
}

/// Permission policy, applied to the lstat'd mode before open and to the
/// fstat'd mode after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModePolicy {
    /// Account crontabs: `0400` or `0600` before open, exactly `0600` after.
    Account,
    /// System crontabs: `0400` under mask `07533` before open. After open,
    /// the same, or anything without group/world write.
    System,
}

impl ModePolicy {
    // 07777 without u+w.
    const ACCOUNT_PRE_MASK: u32 = 0o7577;
    const ACCOUNT_MASK: u32 = 0o7777;
    const ACCOUNT_PERM: u32 = 0o600;
    // 07777 without u+w, g+r, o+r.
    const SYSTEM_MASK: u32 = 0o7533;
    const OWNER_READ: u32 = 0o400;
    const GROUP_WORLD_WRITE: u32 = 0o022;

    pub fn for_claim(claim: &Claim) -> Self {
        match claim {
            Claim::Account(_) => ModePolicy::Account,
            Claim::System => ModePolicy::System,
        }
    }

    /// Whether the lstat'd `mode` may be opened at all.
    pub fn allows_before_open(&self, mode: u32) -> bool {
        match self {
            ModePolicy::Account => mode & Self::ACCOUNT_PRE_MASK == Self::OWNER_READ,
            ModePolicy::System => mode & Self::SYSTEM_MASK == Self::OWNER_READ,
        }
    }

    /// Whether the fstat'd `mode` (permission bits, file type bits ignored)
    /// is allowed.
    pub fn allows(&self, mode: u32) -> bool {
        match self {
            ModePolicy::Account => mode & Self::ACCOUNT_MASK == Self::ACCOUNT_PERM,
            ModePolicy::System => {
                mode & Self::SYSTEM_MASK == Self::OWNER_READ
                    || mode & Self::GROUP_WORLD_WRITE == 0
            }
        }
    }

    /// Both checks, for a file whose mode did not change while it was opened.
    pub fn admits(&self, mode: u32) -> bool {
        self.allows_before_open(mode) && self.allows(mode)
    }
}

/// A crontab that passed every check.
#[derive(Debug)]
pub struct Admitted {
    /// Open, read-only descriptor. Dropping it closes the file.
    pub file: File,
    /// Metadata from `fstat` on `file`.
    pub stat: FileStat,
    /// Resolved account; `None` for system crontabs.
    pub principal: Option<Principal>,
}

/// The validated-file gate.
pub struct Gate {
    fs: Arc<dyn Filesystem>,
    resolver: Arc<dyn PrincipalResolver>,
    superuser_uid: u32,
}

impl Gate {
    pub fn new(fs: Arc<dyn Filesystem>, resolver: Arc<dyn PrincipalResolver>) -> Self {
        Self {
            fs,
            resolver,
            superuser_uid: SUPERUSER_UID,
        }
    }

    /// Override the uid trusted to own any crontab.
    pub fn with_superuser_uid(mut self, uid: u32) -> Self {
        self.superuser_uid = uid;
        self
    }

    /// Validate and open a candidate, logging any rejection.
    pub fn admit(&self, candidate: &Candidate) -> Result<Admitted, Rejection> {
        self.check(candidate).inspect_err(|rejection| {
            let detail = match rejection {
                Rejection::Orphan(_) => "no passwd entry".to_string(),
                _ => candidate.path.display().to_string(),
            };
            log_event(
                Severity::Warning,
                &candidate.display_name,
                rejection.reason_tag(),
                &detail,
            );
            tracing::debug!(
                display_name = %candidate.display_name,
                path = %candidate.path.display(),
                error = %rejection,
                "crontab rejected"
            );
        })
    }

    fn check(&self, candidate: &Candidate) -> Result<Admitted, Rejection> {
        let principal = match &candidate.claim {
            Claim::Account(name) => Some(
                self.resolver
                    .resolve(name)
                    .ok_or_else(|| Rejection::Orphan(name.clone()))?,
            ),
            Claim::System => None,
        };

        let pre = self.fs.lstat(&candidate.path).map_err(Rejection::Lstat)?;
        if !pre.is_regular {
            return Err(Rejection::NotRegular);
        }
        let policy = ModePolicy::for_claim(&candidate.claim);
        if !policy.allows_before_open(pre.permissions()) {
            return Err(Rejection::BadFileMode(pre.permissions()));
        }
        if pre.nlink != 1 {
            return Err(Rejection::BadLinkCount(pre.nlink));
        }

        let file = self
            .fs
            .open_nofollow(&candidate.path)
            .map_err(Rejection::Open)?;

        // From here on `file` is dropped (closed) on every early return.
        let stat = self.fs.fstat(&file).map_err(Rejection::Fstat)?;
        if !stat.is_regular {
            return Err(Rejection::NotRegularAfterOpen);
        }

        if !policy.allows(stat.permissions()) {
            return Err(Rejection::BadFileMode(stat.permissions()));
        }

        if !self.owner_allowed(&candidate.claim, stat.uid, principal.as_ref()) {
            return Err(Rejection::WrongOwner(stat.uid));
        }

        if principal.is_some() && stat.nlink != 1 {
            return Err(Rejection::BadLinkCount(stat.nlink));
        }

        if pre.identity() != stat.identity() {
            return Err(Rejection::ChangedDuringOpen);
        }

        Ok(Admitted {
            file,
            stat,
            principal,
        })
    }

    fn owner_allowed(&self, claim: &Claim, uid: u32, principal: Option<&Principal>) -> bool {
        if uid == self.superuser_uid {
            return true;
        }
        match (claim, principal) {
            (Claim::Account(claimed), Some(p)) => p.uid == uid && p.name == *claimed,
            _ => false,
        }
    }
}
