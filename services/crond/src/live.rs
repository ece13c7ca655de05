//! The live job database.
//!
//! Uses ArcSwap so the dispatch side can load a consistent snapshot once
//! per tick without blocking. A reconciliation pass builds a complete new
//! database off to the side and publishes it with a single pointer swap.

use std::sync::Arc;

use arc_swap::ArcSwap;
use cronspool_jobdb::JobDatabase;

use crate::parser::JobParser;
use crate::reconciler::Reconciler;

/// Holder of the currently published database.
pub struct LiveDatabase<E> {
    current: ArcSwap<JobDatabase<E>>,
}

impl<E> LiveDatabase<E> {
    /// Start with the empty startup database.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(JobDatabase::empty()),
        }
    }

    /// The current database. Holders keep seeing this version even after a
    /// newer one is published.
    pub fn load(&self) -> Arc<JobDatabase<E>> {
        self.current.load_full()
    }

    /// Replace the published database.
    pub fn publish(&self, db: Arc<JobDatabase<E>>) {
        self.current.store(db);
    }

    /// Run one reconciliation pass against the published database and
    /// publish the result if anything changed. Returns whether it did.
    pub fn refresh<P>(&self, reconciler: &Reconciler<P>) -> bool
    where
        P: JobParser<Entries = E>,
    {
        let current = self.load();
        let next = reconciler.reconcile(Arc::clone(&current));
        if Arc::ptr_eq(&current, &next) {
            return false;
        }
        self.publish(next);
        true
    }
}

impl<E> Default for LiveDatabase<E> {
    fn default() -> Self {
        Self::new()
    }
}
