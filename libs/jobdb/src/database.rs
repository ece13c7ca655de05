//! Principal records and the job database container.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{DbError, Timestamp};

/// One owning principal's parsed job set.
///
/// `entries` is opaque to the database; it is produced by the crontab
/// parser and dropped together with the record.
#[derive(Debug)]
pub struct PrincipalRecord<E> {
    name: String,
    source: PathBuf,
    mtime: Timestamp,
    entries: E,
}

impl<E> PrincipalRecord<E> {
    /// Create a record for `name`, parsed from `source` as last modified
    /// at `mtime`.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        mtime: Timestamp,
        entries: E,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            mtime,
            entries,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The file the entries were parsed from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn mtime(&self) -> Timestamp {
        self.mtime
    }

    pub fn entries(&self) -> &E {
        &self.entries
    }
}

/// The set of active principal records at one point in time.
///
/// Records are held behind `Arc` so a database that has been published to
/// readers can be shallow-copied while the next one is built; carrying a
/// record forward moves the same allocation, it never re-parses.
///
/// Lookups are a linear scan. The expected record count is small relative
/// to how often the database is rebuilt.
#[derive(Debug)]
pub struct JobDatabase<E> {
    mtime: Timestamp,
    records: Vec<Arc<PrincipalRecord<E>>>,
}

impl<E> JobDatabase<E> {
    /// Create an empty database stamped with an aggregate timestamp.
    pub fn new(mtime: Timestamp) -> Self {
        Self {
            mtime,
            records: Vec::new(),
        }
    }

    /// Startup database: empty, stamped with the epoch so the first
    /// reconciliation pass always loads.
    pub fn empty() -> Self {
        Self::new(Timestamp::ZERO)
    }

    /// Aggregate timestamp this database was built against.
    pub fn mtime(&self) -> Timestamp {
        self.mtime
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PrincipalRecord<E>>> {
        self.records.iter()
    }

    /// Record names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.name())
    }

    /// Find a record by name.
    pub fn find(&self, name: &str) -> Option<&Arc<PrincipalRecord<E>>> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Append a record at the tail.
    ///
    /// Fails without modifying the database if the name is already present.
    pub fn insert(&mut self, record: Arc<PrincipalRecord<E>>) -> Result<(), DbError> {
        if self.contains(record.name()) {
            return Err(DbError::DuplicatePrincipal(record.name().to_string()));
        }
        self.records.push(record);
        Ok(())
    }

    /// Remove a record by name without destroying it.
    ///
    /// The remaining records keep their relative order.
    pub fn detach(&mut self, name: &str) -> Option<Arc<PrincipalRecord<E>>> {
        let idx = self.records.iter().position(|r| r.name == name)?;
        Some(self.records.remove(idx))
    }

    /// Consume the database, yielding every remaining record.
    pub fn into_records(self) -> Vec<Arc<PrincipalRecord<E>>> {
        self.records
    }
}

impl<E> Clone for JobDatabase<E> {
    /// Shallow copy: the new container shares every record with `self`.
    fn clone(&self) -> Self {
        Self {
            mtime: self.mtime,
            records: self.records.clone(),
        }
    }
}

impl<E> Default for JobDatabase<E> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a, E> IntoIterator for &'a JobDatabase<E> {
    type Item = &'a Arc<PrincipalRecord<E>>;
    type IntoIter = std::slice::Iter<'a, Arc<PrincipalRecord<E>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
