//! Job database primitives.
//!
//! The job database is the in-memory view of every active crontab the
//! daemon knows about. Key concepts:
//!
//! - **Principal record**: one owning identity's job set, keyed by name and
//!   stamped with the modification time of the file it was parsed from.
//! - **Job database**: an insertion-ordered set of principal records plus
//!   an aggregate timestamp used as a cheap change signal.
//!
//! # Invariants
//!
//! - No two records in a database share a name
//! - Records only change membership through [`JobDatabase::insert`] and
//!   [`JobDatabase::detach`]
//! - Timestamps compare at full (seconds + nanoseconds) resolution

mod database;
mod error;
mod timestamp;

pub use database::{JobDatabase, PrincipalRecord};
pub use error::DbError;
pub use timestamp::Timestamp;

/// Record name used for the singular system crontab.
pub const SYSTEM_PRINCIPAL: &str = "*system*";
