//! Integration tests for reconciliation passes.
//!
//! These tests drive the reconciler against scratch spools and check:
//! 1. Unchanged crontabs are carried forward without re-parsing
//! 2. Changed crontabs are re-parsed exactly once
//! 3. Deleted or newly invalid crontabs are released exactly once
//! 4. An unchanged aggregate timestamp costs nothing but the stats


use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use harness::{
    current_uid, resolver, ts, CountingFs, CountingParser, Spools, T0, UNTRUSTED_SUPERUSER,
};

use cronspool_daemon::{
    Filesystem, HostFs, JobDatabase, LiveDatabase, Reconciler, ReconcilerConfig, SYSTEM_PRINCIPAL,
};
use tokio::sync::watch;

fn reconciler(spools: &Spools, parser: &CountingParser) -> Reconciler<CountingParser> {
    reconciler_on(spools, parser, Arc::new(HostFs))
}

fn reconciler_on(
    spools: &Spools,
    parser: &CountingParser,
    fs: Arc<dyn Filesystem>,
) -> Reconciler<CountingParser> {
    Reconciler::new(spools.layout(), fs, Arc::new(resolver()), parser.clone())
        .with_superuser_uid(UNTRUSTED_SUPERUSER)
}

fn names<E>(db: &JobDatabase<E>) -> Vec<String> {
    db.names().map(str::to_string).collect()
}

fn assert_unique<E>(db: &JobDatabase<E>) {
    let all = names(db);
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), unique.len(), "duplicate names in {all:?}");
}

#[test]
fn test_first_pass_loads_everything() {
    let spools = Spools::new();
    spools.user_tab("alice", "0 * * * * a\n", 0o600, ts(T0, 1));
    spools.user_tab("bob", "0 * * * * b\n", 0o600, ts(T0, 2));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let (db, report) =
        reconciler(&spools, &parser).reconcile_with_report(Arc::new(JobDatabase::empty()));

    assert!(report.changed);
    assert_eq!(report.parsed, 2);
    assert_eq!(parser.calls(), 2);
    assert_eq!(db.mtime(), ts(T0, 10));
    assert_eq!(db.len(), 2);
    assert_eq!(db.find("alice").unwrap().mtime(), ts(T0, 1));
    assert_eq!(db.find("alice").unwrap().entries().body, "0 * * * * a\n");
    assert!(!db.find("bob").unwrap().entries().system);
    assert_unique(&db);
}

#[test]
fn test_unchanged_aggregate_is_a_no_op() {
    // Scenario: alice's crontab is valid; a second pass with no filesystem
    // change returns the very same database.
    let spools = Spools::new();
    spools.user_tab("alice", "", 0o600, ts(T0, 1));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let fs = Arc::new(CountingFs::default());
    let reconciler = reconciler_on(&spools, &parser, Arc::clone(&fs) as Arc<dyn Filesystem>);

    let db1 = reconciler.reconcile(Arc::new(JobDatabase::empty()));
    assert_eq!(names(&db1), vec!["alice"]);

    fs.reset();
    let (db2, report) = reconciler.reconcile_with_report(Arc::clone(&db1));

    assert!(Arc::ptr_eq(&db1, &db2));
    assert!(!report.changed);
    assert_eq!(parser.calls(), 1);
    // System crontab plus two spool directories, nothing else.
    assert_eq!(CountingFs::count(&fs.stat), 3);
    assert_eq!(CountingFs::count(&fs.lstat), 0);
    assert_eq!(CountingFs::count(&fs.open), 0);
    assert_eq!(CountingFs::count(&fs.fstat), 0);
    assert_eq!(CountingFs::count(&fs.read_dir), 0);
}

#[test]
fn test_unchanged_crontabs_are_reused() {
    let spools = Spools::new();
    spools.user_tab("alice", "", 0o600, ts(T0, 1));
    spools.user_tab("bob", "", 0o600, ts(T0, 2));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let reconciler = reconciler(&spools, &parser);
    let db1 = reconciler.reconcile(Arc::new(JobDatabase::empty()));
    let alice = Arc::clone(db1.find("alice").unwrap());
    let bob = Arc::clone(db1.find("bob").unwrap());

    // Directory changed, crontabs did not.
    spools.touch_dirs(ts(T0, 11));
    let (db2, report) = reconciler.reconcile_with_report(db1);

    assert!(report.changed);
    assert_eq!(report.reused, 2);
    assert_eq!(report.parsed, 0);
    assert_eq!(parser.calls(), 2);
    assert_eq!(db2.mtime(), ts(T0, 11));
    assert!(Arc::ptr_eq(db2.find("alice").unwrap(), &alice));
    assert!(Arc::ptr_eq(db2.find("bob").unwrap(), &bob));
    assert!(parser.dropped().is_empty());
}

#[test]
fn test_changed_crontab_is_reparsed_once() {
    let spools = Spools::new();
    spools.user_tab("alice", "old", 0o600, ts(T0, 1));
    spools.user_tab("bob", "", 0o600, ts(T0, 2));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let reconciler = reconciler(&spools, &parser);
    let db1 = reconciler.reconcile(Arc::new(JobDatabase::empty()));
    let bob = Arc::clone(db1.find("bob").unwrap());

    // Same second, different nanoseconds: still a change.
    spools.user_tab("alice", "new", 0o600, ts(T0, 5));
    spools.touch_dirs(ts(T0, 11));
    let (db2, report) = reconciler.reconcile_with_report(db1);

    assert_eq!(report.parsed, 1);
    assert_eq!(report.reused, 1);
    assert_eq!(parser.calls(), 3);

    let alice = db2.find("alice").unwrap();
    assert_eq!(alice.mtime(), ts(T0, 5));
    assert_eq!(alice.entries().body, "new");
    assert!(Arc::ptr_eq(db2.find("bob").unwrap(), &bob));

    // The superseded alice record was released exactly once.
    assert_eq!(parser.dropped(), vec!["alice".to_string()]);
}

#[test]
fn test_deleted_crontab_is_released_once() {
    let spools = Spools::new();
    spools.user_tab("alice", "", 0o600, ts(T0, 1));
    let bob_path = spools.user_tab("bob", "", 0o600, ts(T0, 2));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let reconciler = reconciler(&spools, &parser);
    let db1 = reconciler.reconcile(Arc::new(JobDatabase::empty()));

    fs::remove_file(&bob_path).unwrap();
    spools.touch_dirs(ts(T0, 11));
    let (db2, report) = reconciler.reconcile_with_report(db1);

    assert_eq!(names(&db2), vec!["alice"]);
    assert_eq!(report.dropped, 1);
    assert_eq!(parser.dropped(), vec!["bob".to_string()]);

    drop(db2);
    let mut dropped = parser.dropped();
    dropped.sort();
    assert_eq!(dropped, vec!["alice".to_string(), "bob".to_string()]);
}

#[test]
fn test_drop_in_backup_files_are_skipped() {
    // Scenario: foo.bak in the drop-in spool never becomes a record.
    let spools = Spools::new();
    spools.dropin_tab("foo.bak", "", 0o600, ts(T0, 1));
    spools.dropin_tab("foo~", "", 0o600, ts(T0, 1));
    spools.dropin_tab("foo", "", 0o600, ts(T0, 1));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let db = Reconciler::new(
        spools.layout(),
        Arc::new(HostFs),
        Arc::new(resolver()),
        parser.clone(),
    )
    .with_superuser_uid(current_uid())
    .reconcile(Arc::new(JobDatabase::empty()));

    assert_eq!(names(&db), vec!["foo"]);
    assert!(db.find("foo.bak").is_none());
    assert!(db.find("foo").unwrap().entries().system);
    assert_eq!(parser.calls(), 1);
}

#[test]
fn test_now_invalid_crontab_is_drained() {
    // Scenario: bob's crontab becomes group-writable; the gate refuses it
    // and his previous record does not survive the pass.
    let spools = Spools::new();
    spools.user_tab("alice", "", 0o600, ts(T0, 1));
    let bob_path = spools.user_tab("bob", "", 0o600, ts(T0, 2));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let reconciler = reconciler(&spools, &parser);
    let db1 = reconciler.reconcile(Arc::new(JobDatabase::empty()));
    assert!(db1.contains("bob"));

    fs::set_permissions(&bob_path, fs::Permissions::from_mode(0o620)).unwrap();
    spools.touch_dirs(ts(T0, 11));
    let (db2, report) = reconciler.reconcile_with_report(db1);

    assert_eq!(names(&db2), vec!["alice"]);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(parser.dropped(), vec!["bob".to_string()]);
    assert_eq!(parser.calls(), 2);
}

#[test]
fn test_orphaned_crontab_produces_no_record() {
    let spools = Spools::new();
    spools.user_tab("mallory", "", 0o600, ts(T0, 1));
    spools.user_tab("alice", "", 0o600, ts(T0, 1));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let (db, report) =
        reconciler(&spools, &parser).reconcile_with_report(Arc::new(JobDatabase::empty()));

    assert_eq!(names(&db), vec!["alice"]);
    assert_eq!(report.rejected, 1);
    assert_eq!(parser.calls(), 1);
}

#[test]
fn test_parse_failure_leaves_principal_empty() {
    let spools = Spools::new();
    spools.user_tab("alice", "fine", 0o600, ts(T0, 1));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let reconciler = reconciler(&spools, &parser);
    let db1 = reconciler.reconcile(Arc::new(JobDatabase::empty()));
    assert!(db1.contains("alice"));

    spools.user_tab("alice", "MALFORMED", 0o600, ts(T0, 2));
    spools.touch_dirs(ts(T0, 11));
    let (db2, report) = reconciler.reconcile_with_report(db1);

    assert!(db2.is_empty());
    assert_eq!(report.parse_failed, 1);
    assert_eq!(parser.dropped(), vec!["alice".to_string()]);

    // Fixed on a later pass.
    spools.user_tab("alice", "fine again", 0o600, ts(T0, 3));
    spools.touch_dirs(ts(T0, 12));
    let db3 = reconciler.reconcile(db2);
    assert_eq!(db3.find("alice").unwrap().entries().body, "fine again");
}

#[test]
fn test_system_crontab_comes_first() {
    let spools = Spools::new();
    spools.user_tab("alice", "", 0o600, ts(T0, 1));
    spools.dropin_tab("backup", "", 0o644, ts(T0, 1));
    spools.system_tab("", 0o644, ts(T0, 20));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let db = Reconciler::new(
        spools.layout(),
        Arc::new(HostFs),
        Arc::new(resolver()),
        parser.clone(),
    )
    .with_superuser_uid(current_uid())
    .reconcile(Arc::new(JobDatabase::empty()));

    assert_eq!(names(&db), vec![SYSTEM_PRINCIPAL, "alice", "backup"]);
    // Aggregate includes the system crontab.
    assert_eq!(db.mtime(), ts(T0, 20));
    assert!(db.find(SYSTEM_PRINCIPAL).unwrap().entries().system);
}

#[test]
fn test_system_crontab_removal_drains_it() {
    let spools = Spools::new();
    spools.system_tab("", 0o644, ts(T0, 20));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let reconciler = Reconciler::new(
        spools.layout(),
        Arc::new(HostFs),
        Arc::new(resolver()),
        parser.clone(),
    )
    .with_superuser_uid(current_uid());

    let db1 = reconciler.reconcile(Arc::new(JobDatabase::empty()));
    assert!(db1.contains(SYSTEM_PRINCIPAL));

    fs::remove_file(&spools.system).unwrap();
    spools.touch_dirs(ts(T0, 30));
    let db2 = reconciler.reconcile(db1);

    assert!(db2.is_empty());
    assert_eq!(db2.mtime(), ts(T0, 30));
    assert_eq!(parser.dropped(), vec![SYSTEM_PRINCIPAL.to_string()]);
}

#[test]
fn test_names_stay_unique_across_spools() {
    // A drop-in crontab named like an account collides with it; the first
    // one enumerated wins.
    let spools = Spools::new();
    spools.user_tab("alice", "account", 0o600, ts(T0, 1));
    spools.dropin_tab("alice", "drop-in", 0o644, ts(T0, 1));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let reconciler = Reconciler::new(
        spools.layout(),
        Arc::new(HostFs),
        Arc::new(resolver()),
        parser.clone(),
    )
    .with_superuser_uid(current_uid());

    let (db1, report) = reconciler.reconcile_with_report(Arc::new(JobDatabase::empty()));
    assert_eq!(names(&db1), vec!["alice"]);
    assert_eq!(db1.find("alice").unwrap().entries().body, "account");
    assert_eq!(report.rejected, 1);
    assert_unique(&db1);

    spools.touch_dirs(ts(T0, 11));
    let db2 = reconciler.reconcile(db1);
    assert_eq!(names(&db2), vec!["alice"]);
    assert_unique(&db2);
    assert_eq!(parser.calls(), 1);
}

#[test]
fn test_record_is_not_reused_across_spools() {
    // The account crontab goes bad and a drop-in with the same name and
    // mtime appears: the drop-in must be parsed, not inherit the account
    // record.
    let spools = Spools::new();
    let account = spools.user_tab("alice", "account body", 0o600, ts(T0, 7));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let reconciler = Reconciler::new(
        spools.layout(),
        Arc::new(HostFs),
        Arc::new(resolver()),
        parser.clone(),
    )
    .with_superuser_uid(current_uid());

    let db1 = reconciler.reconcile(Arc::new(JobDatabase::empty()));
    assert_eq!(db1.find("alice").unwrap().source(), account.as_path());

    fs::set_permissions(&account, fs::Permissions::from_mode(0o620)).unwrap();
    let dropin = spools.dropin_tab("alice", "drop-in body", 0o644, ts(T0, 7));
    spools.touch_dirs(ts(T0, 11));
    let (db2, report) = reconciler.reconcile_with_report(db1);

    let alice = db2.find("alice").unwrap();
    assert_eq!(alice.entries().body, "drop-in body");
    assert!(alice.entries().system);
    assert_eq!(alice.source(), dropin.as_path());
    assert_eq!(report.reused, 0);
    assert_eq!(report.parsed, 1);
    assert_eq!(parser.calls(), 2);
    assert_eq!(parser.dropped(), vec!["alice".to_string()]);
}

#[test]
fn test_published_snapshot_survives_reconcile() {
    let spools = Spools::new();
    let bob_path = spools.user_tab("bob", "", 0o600, ts(T0, 2));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let reconciler = reconciler(&spools, &parser);
    let live = LiveDatabase::new();

    assert!(live.refresh(&reconciler));
    let reader = live.load();
    assert!(!live.refresh(&reconciler));

    fs::remove_file(&bob_path).unwrap();
    spools.touch_dirs(ts(T0, 11));
    assert!(live.refresh(&reconciler));

    // The reader still holds bob; he is released when it lets go.
    assert!(reader.contains("bob"));
    assert!(live.load().is_empty());
    assert!(parser.dropped().is_empty());
    drop(reader);
    assert_eq!(parser.dropped(), vec!["bob".to_string()]);
}

#[tokio::test]
async fn test_run_loop_publishes_and_stops() {
    let spools = Spools::new();
    spools.user_tab("alice", "", 0o600, ts(T0, 1));
    spools.touch_dirs(ts(T0, 10));

    let parser = CountingParser::default();
    let reconciler = Arc::new(reconciler(&spools, &parser));
    let live = Arc::new(LiveDatabase::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(Arc::clone(&reconciler).run(
        Arc::clone(&live),
        ReconcilerConfig {
            reconcile_interval: Duration::from_millis(10),
        },
        shutdown_rx,
    ));

    let mut loaded = false;
    for _ in 0..200 {
        if live.load().contains("alice") {
            loaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(loaded, "run loop never published alice");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run loop did not stop")
        .unwrap();
    assert_eq!(parser.calls(), 1);
}
