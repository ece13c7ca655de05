//! Error types for job database operations.

use thiserror::Error;

/// Job database errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DbError {
    /// A record with this name is already a member of the database.
    #[error("duplicate principal: {0}")]
    DuplicatePrincipal(String),
}
