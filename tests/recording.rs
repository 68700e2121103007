mod common;

use sortpipe::core::artifacts;
use sortpipe::core::engine::LocalEngine;
use sortpipe::core::error::SortpipeError;
use sortpipe::stages::{grouping, recording, session};

#[test]
fn prepare_writes_cache_and_registers_row() {
    let (_tmp, store) = common::setup_store();
    let key = common::seed_session(&store, "sess");

    let artifact = recording::prepare_recording(&store, &LocalEngine, &key).expect("prepare");
    assert!(artifact.recording_path.exists());
    assert_eq!(artifact.num_samples, common::N_SAMPLES);
    assert_eq!(artifact.sampling_rate, common::RATE);

    let series = recording::load_prepared(&artifact).expect("load");
    assert_eq!(series.channel_ids, vec![0, 1]);
    assert_eq!(series.geometry.len(), 2);

    let cached = recording::lookup_recording(&store, &key).expect("lookup");
    assert_eq!(cached, Some(artifact));
}

#[test]
fn repeated_prepare_is_a_cache_hit() {
    let (_tmp, store) = common::setup_store();
    let key = common::seed_session(&store, "sess");

    let first = recording::prepare_recording(&store, &LocalEngine, &key).expect("first");
    let second = recording::prepare_recording(&store, &LocalEngine, &key).expect("second");
    assert_eq!(first, second);

    // Exactly one run directory, no duplicate artifacts.
    let dirs = artifacts::list_run_dirs(&store.storage_root).expect("dirs");
    assert_eq!(dirs, vec![key.run_id()]);
}

#[test]
fn short_intervals_are_rejected() {
    let (_tmp, store) = common::setup_store();
    let mut key = common::seed_session(&store, "sess");

    // 500 samples at 1 kHz, below the floor.
    session::add_sort_interval(&store, "sess", "short", 0.0, 0.5).expect("interval");
    key.interval_name = "short".to_string();

    let err = recording::prepare_recording(&store, &LocalEngine, &key).expect_err("must fail");
    assert!(matches!(err, SortpipeError::InvalidIntervalError { .. }));
    assert!(recording::lookup_recording(&store, &key)
        .expect("lookup")
        .is_none());
}

#[test]
fn interval_at_the_sample_floor_prepares() {
    let (_tmp, store) = common::setup_store();
    let mut key = common::seed_session(&store, "sess");

    // Exactly 1000 samples at 1 kHz, the smallest interval that passes.
    session::add_sort_interval(&store, "sess", "floor", 0.0, 1.0).expect("interval");
    key.interval_name = "floor".to_string();

    let artifact = recording::prepare_recording(&store, &LocalEngine, &key).expect("prepare");
    assert_eq!(artifact.num_samples, 1000);
}

#[test]
fn single_reference_channel_is_subtracted_and_dropped() {
    let (_tmp, store) = common::setup_store();
    let key = common::seed_session(&store, "sess");

    // Re-reference group 0 against electrode 2 (a member of group 1).
    grouping::set_reference_from_list(&store, "sess", &[(0, 2)]).expect("reference");
    let artifact = recording::prepare_recording(&store, &LocalEngine, &key).expect("prepare");
    let series = recording::load_prepared(&artifact).expect("load");
    // The reference channel never lands in the cached series.
    assert_eq!(series.channel_ids, vec![0, 1]);
}

#[test]
fn recording_timestamps_are_restricted_to_the_interval() {
    let (_tmp, store) = common::setup_store();
    common::seed_session(&store, "sess");

    session::add_sort_interval(&store, "sess", "late", 0.9, 3.0).expect("interval");
    let ts = recording::get_recording_timestamps(&store, &LocalEngine, "sess", "late")
        .expect("timestamps");
    assert_eq!(ts.len(), common::N_SAMPLES - 900);
    assert!((ts[0] - 0.9).abs() < 1e-9);
}
