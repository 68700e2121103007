mod common;

use rustc_hash::FxHashSet;
use sortpipe::core::artifacts;
use sortpipe::core::engine::LocalEngine;
use sortpipe::stages::recording;
use std::fs;

fn make_run_dirs(store: &sortpipe::core::store::Store, names: &[&str]) {
    for name in names {
        fs::create_dir_all(store.storage_root.join(name)).expect("mkdir");
    }
}

#[test]
fn reconcile_removes_exactly_the_orphans() {
    let (_tmp, store) = common::setup_store();
    make_run_dirs(&store, &["r1", "r2", "r3", "r4"]);

    let live: FxHashSet<String> = ["r1", "r3"].iter().map(|s| s.to_string()).collect();
    let removed = artifacts::reconcile(&store.storage_root, &live).expect("reconcile");

    let mut removed_names: Vec<String> = removed
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    removed_names.sort();
    assert_eq!(removed_names, vec!["r2", "r4"]);
    assert_eq!(
        artifacts::list_run_dirs(&store.storage_root).expect("dirs"),
        vec!["r1", "r3"]
    );
}

#[test]
fn nightly_cleanup_keeps_database_referenced_runs() {
    let (_tmp, store) = common::setup_store();
    let key = common::seed_session(&store, "sess");
    recording::prepare_recording(&store, &LocalEngine, &key).expect("prepare");
    make_run_dirs(&store, &["abandoned"]);

    let removed = artifacts::nightly_cleanup(&store).expect("cleanup");
    assert_eq!(removed.len(), 1);
    assert_eq!(
        artifacts::list_run_dirs(&store.storage_root).expect("dirs"),
        vec![key.run_id()]
    );
}

#[test]
fn declined_confirmation_deletes_nothing() {
    let (_tmp, store) = common::setup_store();
    make_run_dirs(&store, &["r1", "r2"]);

    let removed = artifacts::interactive_cleanup(&store, |orphans| {
        assert_eq!(orphans.len(), 2);
        false
    })
    .expect("cleanup");
    assert!(removed.is_empty());
    assert_eq!(
        artifacts::list_run_dirs(&store.storage_root).expect("dirs"),
        vec!["r1", "r2"]
    );
}

#[test]
fn confirmed_cleanup_removes_the_listed_orphans() {
    let (_tmp, store) = common::setup_store();
    let key = common::seed_session(&store, "sess");
    recording::prepare_recording(&store, &LocalEngine, &key).expect("prepare");
    make_run_dirs(&store, &["stale"]);

    let removed = artifacts::interactive_cleanup(&store, |orphans| {
        orphans == ["stale".to_string()]
    })
    .expect("cleanup");
    assert_eq!(removed.len(), 1);
    assert_eq!(
        artifacts::list_run_dirs(&store.storage_root).expect("dirs"),
        vec![key.run_id()]
    );
}
