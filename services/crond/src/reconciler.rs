//! Reconciliation of the job database against the spools.
//!
//! A pass:
//! - Compares the aggregate spool timestamp with the database's and stops
//!   if nothing can have changed
//! - Runs every discovered crontab through the gate
//! - Carries unchanged records forward, re-parses changed ones
//! - Drops whatever is left of the old database (deleted or now-invalid
//!   crontabs)

use std::sync::Arc;
use std::time::Duration;

use cronspool_jobdb::{JobDatabase, PrincipalRecord};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::fs::Filesystem;
use crate::gate::Gate;
use crate::live::LiveDatabase;
use crate::logging::{log_event, Severity};
use crate::parser::JobParser;
use crate::principal::PrincipalResolver;
use crate::spool::{Candidate, SpoolEnumerator, SpoolLayout};

/// Run loop configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between reconciliation passes.
    pub reconcile_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(60),
        }
    }
}

/// Outcome counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// False when the aggregate timestamp was unchanged and no work was done.
    pub changed: bool,
    /// Records carried forward without parsing.
    pub reused: usize,
    /// Crontabs parsed into new records.
    pub parsed: usize,
    /// Crontabs refused by the gate or by name collision.
    pub rejected: usize,
    /// Crontabs the parser refused.
    pub parse_failed: usize,
    /// Old records released at the end of the pass.
    pub dropped: usize,
}

/// Rebuilds the job database from the spools.
pub struct Reconciler<P: JobParser> {
    spools: SpoolEnumerator,
    gate: Gate,
    parser: P,
}

impl<P: JobParser> Reconciler<P> {
    pub fn new(
        layout: SpoolLayout,
        fs: Arc<dyn Filesystem>,
        resolver: Arc<dyn PrincipalResolver>,
        parser: P,
    ) -> Self {
        Self {
            spools: SpoolEnumerator::new(layout, Arc::clone(&fs)),
            gate: Gate::new(fs, resolver),
            parser,
        }
    }

    /// Override the uid trusted to own any crontab.
    pub fn with_superuser_uid(mut self, uid: u32) -> Self {
        self.gate = self.gate.with_superuser_uid(uid);
        self
    }

    pub fn layout(&self) -> &SpoolLayout {
        self.spools.layout()
    }

    /// Run one pass, consuming the previous database and returning its
    /// replacement. Returns `old` itself when nothing changed.
    pub fn reconcile(&self, old: Arc<JobDatabase<P::Entries>>) -> Arc<JobDatabase<P::Entries>> {
        self.reconcile_with_report(old).0
    }

    /// [`reconcile`](Self::reconcile), also returning what the pass did.
    pub fn reconcile_with_report(
        &self,
        old: Arc<JobDatabase<P::Entries>>,
    ) -> (Arc<JobDatabase<P::Entries>>, PassReport) {
        let snapshot = self.spools.snapshot();
        if snapshot.aggregate == old.mtime() {
            debug!(mtime = %snapshot.aggregate, "spool mtime unchanged, no load needed");
            return (old, PassReport::default());
        }

        debug!(
            old_mtime = %old.mtime(),
            new_mtime = %snapshot.aggregate,
            "loading job database"
        );

        // Private working copy: published readers of `old` are unaffected.
        let mut residue = Arc::unwrap_or_clone(old);
        let mut db = JobDatabase::new(snapshot.aggregate);
        let mut report = PassReport {
            changed: true,
            ..PassReport::default()
        };

        if !snapshot.system.is_zero() {
            let candidate = self.spools.system_candidate();
            self.process(&candidate, &mut db, &mut residue, &mut report);
        }

        for candidate in self.spools.spool_candidates() {
            self.process(&candidate, &mut db, &mut residue, &mut report);
        }

        for record in residue.into_records() {
            debug!(name = record.name(), "dropping stale crontab");
            report.dropped += 1;
        }

        info!(
            principals = db.len(),
            reused = report.reused,
            parsed = report.parsed,
            rejected = report.rejected,
            parse_failed = report.parse_failed,
            dropped = report.dropped,
            "job database loaded"
        );

        (Arc::new(db), report)
    }

    fn process(
        &self,
        candidate: &Candidate,
        db: &mut JobDatabase<P::Entries>,
        residue: &mut JobDatabase<P::Entries>,
        report: &mut PassReport,
    ) {
        let name = candidate.display_name.as_str();
        let path = candidate.path.display().to_string();

        if db.contains(name) {
            log_event(Severity::Warning, name, "DUPLICATE NAME", &path);
            report.rejected += 1;
            return;
        }

        let Ok(mut admitted) = self.gate.admit(candidate) else {
            report.rejected += 1;
            return;
        };

        if let Some(existing) = residue.detach(name) {
            // Account and drop-in crontabs share one name space.
            if existing.mtime() == admitted.stat.mtime && existing.source() == candidate.path {
                debug!(name, "no change, using old data");
                Self::attach(db, existing);
                report.reused += 1;
                return;
            }
            debug!(name, old_mtime = %existing.mtime(), "delete old data");
            drop(existing);
            log_event(Severity::Notice, name, "RELOAD", &path);
        }

        match self
            .parser
            .parse(&mut admitted.file, admitted.principal.as_ref(), name)
        {
            Ok(entries) => {
                let record = PrincipalRecord::new(name, &candidate.path, admitted.stat.mtime, entries);
                Self::attach(db, Arc::new(record));
                report.parsed += 1;
            }
            Err(e) => {
                log_event(Severity::Warning, name, "PARSE FAILED", &e.to_string());
                report.parse_failed += 1;
            }
        }
        // `admitted.file` is closed here.
    }

    fn attach(db: &mut JobDatabase<P::Entries>, record: Arc<PrincipalRecord<P::Entries>>) {
        if let Err(e) = db.insert(record) {
            warn!(error = %e, "record not attached");
        }
    }
}

impl<P: JobParser + 'static> Reconciler<P> {
    /// Run passes on an interval until shutdown, publishing each new
    /// database to `live`.
    pub async fn run(
        self: Arc<Self>,
        live: Arc<LiveDatabase<P::Entries>>,
        config: ReconcilerConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            reconcile_interval_secs = config.reconcile_interval.as_secs(),
            "Starting reconciliation loop"
        );

        let mut interval = tokio::time::interval(config.reconcile_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reconciler = Arc::clone(&self);
                    let live = Arc::clone(&live);
                    match tokio::task::spawn_blocking(move || live.refresh(&reconciler)).await {
                        Ok(true) => debug!("published new job database"),
                        Ok(false) => {}
                        Err(e) => error!(error = %e, "Reconciliation pass panicked"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }
}
