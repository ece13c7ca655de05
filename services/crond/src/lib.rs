//! cronspool crontab daemon library
//!
//! Keeps an in-memory database of every principal's active crontab,
//! rebuilt from the spool directories on a fixed interval.
//!
//! ## Architecture
//!
//! ```text
//! Reconciler ──► SpoolEnumerator ──► Filesystem
//!     │                                  ▲
//!     ├────────► Gate ───────────────────┘
//!     │            └──► PrincipalResolver
//!     ├────────► JobParser
//!     └────────► LiveDatabase (ArcSwap<JobDatabase>)
//! ```
//!
//! ## Modules
//!
//! - `gate`: ownership/permission/race checks before a crontab is opened
//! - `spool`: spool layout, filename filters, change detection
//! - `reconciler`: the reuse / re-parse / drop pass and its run loop
//! - `live`: atomic publication of the current database

pub mod config;
pub mod fs;
pub mod gate;
pub mod live;
pub mod logging;
pub mod parser;
pub mod principal;
pub mod reconciler;
pub mod spool;

// Re-export commonly used types
pub use cronspool_jobdb::{JobDatabase, PrincipalRecord, Timestamp, SYSTEM_PRINCIPAL};
pub use fs::{FileStat, Filesystem, HostFs};
pub use gate::{Admitted, Gate, ModePolicy, Rejection};
pub use live::LiveDatabase;
pub use parser::{CrontabEntries, CrontabParser, JobParser, ParseError};
pub use principal::{PasswdResolver, Principal, PrincipalResolver, StaticResolver};
pub use reconciler::{PassReport, Reconciler, ReconcilerConfig};
pub use spool::{Candidate, Claim, SpoolDescriptor, SpoolEnumerator, SpoolLayout};
