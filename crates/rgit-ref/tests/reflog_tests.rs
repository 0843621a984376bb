//! Reflog scanning: forward iteration tolerance, the time-indexed backward
//! lookup, enumeration and expiry.

use std::fs;
use std::ops::ControlFlow;
use std::path::Path;

use bstr::BString;
use rgit_hash::ObjectId;
use rgit_ref::{FilesRefStore, RefError, RefWarning, ReflogEntry, UpdateFlags};
use rgit_utils::date::{GitDate, Signature};

fn oid(byte: char) -> ObjectId {
    ObjectId::from_hex(byte.to_string().repeat(40)).unwrap()
}

fn write_ref_file(git_dir: &Path, name: &str, content: &str) {
    let path = git_dir.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A raw reflog line as the writer lays it down.
fn log_line(old: ObjectId, new: ObjectId, ts: i64, msg: &str) -> String {
    format!("{old} {new} Test User <test@example.com> {ts} +0000\t{msg}\n")
}

fn make_store(git_dir: &Path) -> FilesRefStore {
    let mut store = FilesRefStore::new(git_dir);
    store.set_committer(Signature {
        name: BString::from("Test User"),
        email: BString::from("test@example.com"),
        date: GitDate::new(1234567890, 0),
    });
    store
}

fn entries(store: &FilesRefStore, name: &str) -> Vec<ReflogEntry> {
    let mut out = Vec::new();
    store
        .for_each_reflog_ent(name, |e| {
            out.push(e.clone());
            ControlFlow::Continue(())
        })
        .unwrap();
    out
}

/// Three records: X at t=100, Y at t=200, Z at t=300.
fn seed_xyz(git_dir: &Path) {
    let log = [
        log_line(ObjectId::NULL, oid('1'), 100, "create"),
        log_line(oid('1'), oid('2'), 200, "second"),
        log_line(oid('2'), oid('3'), 300, "third"),
    ]
    .concat();
    write_ref_file(git_dir, "logs/refs/heads/main", &log);
    write_ref_file(git_dir, "refs/heads/main", &format!("{}\n", oid('3')));
}

#[test]
fn at_time_picks_newest_not_after() {
    let dir = tempfile::tempdir().unwrap();
    seed_xyz(dir.path());
    let store = make_store(dir.path());

    let at = store.read_ref_at("refs/heads/main", 250, None).unwrap();
    assert_eq!(at.target, oid('2'));
    assert_eq!(at.cutoff_time, 200);
    assert_eq!(at.cutoff_tz, 0);
    assert_eq!(at.cutoff_cnt, 1);
    assert_eq!(at.message, "second");
    assert!(!at.predates);
    assert!(at.warnings.is_empty());

    // Exactly on a record's timestamp
    let at = store.read_ref_at("refs/heads/main", 300, None).unwrap();
    assert_eq!(at.target, oid('3'));
    assert_eq!(at.cutoff_time, 300);
}

#[test]
fn at_time_before_log_signals_predates() {
    let dir = tempfile::tempdir().unwrap();
    seed_xyz(dir.path());
    let store = make_store(dir.path());

    let at = store.read_ref_at("refs/heads/main", 50, None).unwrap();
    assert!(at.predates);
    assert_eq!(at.target, oid('1'));
    assert_eq!(at.cutoff_time, 100);
    assert_eq!(at.cutoff_cnt, 3);
}

#[test]
fn at_time_past_log_end_returns_current() {
    let dir = tempfile::tempdir().unwrap();
    seed_xyz(dir.path());
    let store = make_store(dir.path());

    let at = store.read_ref_at("refs/heads/main", 1000, None).unwrap();
    assert_eq!(at.target, oid('3'));
    assert!(at.warnings.is_empty());
}

#[test]
fn nth_most_recent_lookup() {
    let dir = tempfile::tempdir().unwrap();
    seed_xyz(dir.path());
    let store = make_store(dir.path());

    // cnt 0 = the newest record
    let at = store.read_ref_at("refs/heads/main", 0, Some(0)).unwrap();
    assert_eq!(at.target, oid('3'));
    let at = store.read_ref_at("refs/heads/main", 0, Some(1)).unwrap();
    assert_eq!(at.target, oid('2'));
    let at = store.read_ref_at("refs/heads/main", 0, Some(2)).unwrap();
    assert_eq!(at.target, oid('1'));
}

#[test]
fn gap_between_records_warns_but_answers() {
    let dir = tempfile::tempdir().unwrap();
    let log = [
        log_line(ObjectId::NULL, oid('1'), 100, "create"),
        // Gap: previous new was '1', this old claims 'e'
        log_line(oid('e'), oid('2'), 200, "second"),
    ]
    .concat();
    write_ref_file(dir.path(), "logs/refs/heads/main", &log);
    write_ref_file(dir.path(), "refs/heads/main", &format!("{}\n", oid('2')));
    let store = make_store(dir.path());

    let at = store.read_ref_at("refs/heads/main", 150, None).unwrap();
    assert_eq!(at.target, oid('1'));
    assert_eq!(
        at.warnings,
        vec![RefWarning::ReflogGap {
            name: "refs/heads/main".into(),
            earlier_new: oid('1'),
            later_old: oid('e'),
        }]
    );
}

#[test]
fn forward_iteration_warns_on_gap_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let log = [
        log_line(ObjectId::NULL, oid('1'), 100, "create"),
        log_line(oid('e'), oid('2'), 200, "second"),
        log_line(oid('2'), oid('3'), 300, "third"),
    ]
    .concat();
    write_ref_file(dir.path(), "logs/refs/heads/main", &log);
    let store = make_store(dir.path());

    let all = entries(&store, "refs/heads/main");
    assert_eq!(all.len(), 3);
    let warnings = store.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(warnings[0], RefWarning::ReflogGap { .. }));
}

#[test]
fn forward_iteration_skips_corrupt_lines() {
    let dir = tempfile::tempdir().unwrap();
    let log = format!(
        "{}garbage line\n{}",
        log_line(ObjectId::NULL, oid('1'), 100, "create"),
        log_line(oid('1'), oid('2'), 200, "second"),
    );
    write_ref_file(dir.path(), "logs/refs/heads/main", &log);
    let store = make_store(dir.path());

    let all = entries(&store, "refs/heads/main");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].message, "create");
    assert_eq!(all[1].message, "second");
}

#[test]
fn forward_iteration_from_offset() {
    let dir = tempfile::tempdir().unwrap();
    let first = log_line(ObjectId::NULL, oid('1'), 100, "create");
    let second = log_line(oid('1'), oid('2'), 200, "second");
    write_ref_file(
        dir.path(),
        "logs/refs/heads/main",
        &format!("{first}{second}"),
    );
    let store = make_store(dir.path());

    // Start a few bytes into the first record: it is discarded as partial
    let ofs = (first.len() + second.len() - 10) as u64;
    let mut seen = Vec::new();
    store
        .for_each_recent_reflog_ent("refs/heads/main", ofs, |e| {
            seen.push(e.message.clone());
            ControlFlow::Continue(())
        })
        .unwrap();
    assert_eq!(seen, vec![BString::from("second")]);
}

#[test]
fn read_ref_at_rejects_corrupt_log() {
    let dir = tempfile::tempdir().unwrap();
    write_ref_file(dir.path(), "logs/refs/heads/main", "no identity here\n");
    let store = make_store(dir.path());
    assert!(matches!(
        store.read_ref_at("refs/heads/main", 100, None),
        Err(RefError::ReflogCorrupt { .. })
    ));

    write_ref_file(dir.path(), "logs/refs/heads/empty", "");
    assert!(matches!(
        store.read_ref_at("refs/heads/empty", 100, None),
        Err(RefError::ReflogCorrupt { .. })
    ));
}

#[test]
fn enumerate_refs_with_logs() {
    let dir = tempfile::tempdir().unwrap();
    let store = make_store(dir.path());
    store
        .update_ref(
            "create",
            "refs/heads/main",
            &oid('a'),
            Some(&ObjectId::NULL),
            UpdateFlags::empty(),
        )
        .unwrap();
    store
        .update_ref(
            "create",
            "refs/heads/topic",
            &oid('b'),
            Some(&ObjectId::NULL),
            UpdateFlags::empty(),
        )
        .unwrap();

    let mut seen = Vec::new();
    store
        .for_each_reflog(|name, target| {
            seen.push((name.to_string(), *target));
            ControlFlow::Continue(())
        })
        .unwrap();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("refs/heads/main".to_string(), oid('a')),
            ("refs/heads/topic".to_string(), oid('b')),
        ]
    );
}

#[test]
fn tags_get_no_log_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let store = make_store(dir.path());
    store
        .update_ref(
            "tag",
            "refs/tags/v1",
            &oid('a'),
            Some(&ObjectId::NULL),
            UpdateFlags::empty(),
        )
        .unwrap();
    assert!(!dir.path().join("logs/refs/tags/v1").exists());

    // An existing log keeps receiving entries even for unlogged kinds
    write_ref_file(dir.path(), "logs/refs/tags/v2", "");
    store
        .update_ref(
            "tag",
            "refs/tags/v2",
            &oid('b'),
            Some(&ObjectId::NULL),
            UpdateFlags::empty(),
        )
        .unwrap();
    assert_eq!(entries(&store, "refs/tags/v2").len(), 1);
}

#[test]
fn bare_store_writes_no_logs() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = make_store(dir.path());
    store.set_log_all_ref_updates(false);
    store
        .update_ref(
            "create",
            "refs/heads/main",
            &oid('a'),
            Some(&ObjectId::NULL),
            UpdateFlags::empty(),
        )
        .unwrap();
    assert!(!dir.path().join("logs/refs/heads/main").exists());
}

#[test]
fn expire_keeps_tip_and_recent() {
    let dir = tempfile::tempdir().unwrap();
    seed_xyz(dir.path());
    let store = make_store(dir.path());

    let removed = store.expire_reflog("refs/heads/main", 150).unwrap();
    assert_eq!(removed, 1);
    let all = entries(&store, "refs/heads/main");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].new, oid('2'));

    // Expiring everything still keeps the newest record
    let removed = store.expire_reflog("refs/heads/main", i64::MAX).unwrap();
    assert_eq!(removed, 1);
    let all = entries(&store, "refs/heads/main");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].new, oid('3'));
}
