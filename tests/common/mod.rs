//! Shared fixtures: a temp pipeline store seeded with a small two-probe
//! session and a synthetic source recording the local engine can sort.

use sortpipe::core::db;
use sortpipe::core::engine::{self, TimeSeries, LOCAL_SORTER};
use sortpipe::core::params::FilterParams;
use sortpipe::core::store::Store;
use sortpipe::core::{access, workspace::LocalWorkspace};
use sortpipe::stages::recording::RecordingKey;
use sortpipe::stages::sorting::SortingSelection;
use sortpipe::stages::{curation, grouping, metrics, recording, session, sorting};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const RATE: f64 = 1000.0;
pub const N_SAMPLES: usize = 2000;

pub fn setup_store() -> (TempDir, Store) {
    let tmp = TempDir::new().expect("tempdir");
    let store = Store::new(tmp.path());
    db::initialize_pipeline_db(&store).expect("init db");
    (tmp, store)
}

/// Synthetic four-channel source: mostly flat traces with a burst of
/// positive spikes per channel, spaced widely enough to survive artifact
/// masking and trip the threshold sorter after whitening.
pub fn write_source(dir: &Path) -> PathBuf {
    let timestamps: Vec<f64> = (0..N_SAMPLES).map(|i| i as f64 / RATE).collect();
    let mut traces = Vec::new();
    for c in 0..4usize {
        let mut trace = vec![0.0f32; N_SAMPLES];
        for k in 0..5usize {
            trace[100 + c * 20 + k * 350] = 10.0;
        }
        traces.push(trace);
    }
    let series = TimeSeries {
        channel_ids: vec![0, 1, 2, 3],
        sampling_rate: RATE,
        timestamps,
        traces,
        geometry: vec![[0.0, 0.0], [0.0, 20.0], [0.0, 40.0], [0.0, 60.0]],
    };
    let path = dir.join("source.json");
    engine::write_series_cache(&path, &series).expect("write source");
    path
}

pub fn electrode_rows() -> Vec<session::ElectrodeRow> {
    let mut rows = Vec::new();
    for (id, group) in [(0, "a"), (1, "a"), (2, "b"), (3, "b")] {
        rows.push(session::ElectrodeRow {
            electrode_id: id,
            electrode_group_name: group.to_string(),
            probe_shank: 0,
            probe_electrode: id,
            bad_channel: false,
            original_reference_electrode: -1,
            rel_x: 0.0,
            rel_y: id as f64 * 20.0,
            rel_z: 0.0,
        });
    }
    rows
}

/// Register session, electrodes, groups, interval, and default parameter
/// sets. Returns the tuple key for sort group 0.
pub fn seed_session(store: &Store, session_id: &str) -> RecordingKey {
    let source = write_source(&store.root);
    session::register_session(store, session_id, &source, RATE).expect("register session");
    session::import_electrodes(store, session_id, &electrode_rows()).expect("electrodes");
    grouping::group_by_shank(store, session_id).expect("group");
    session::add_sort_interval(store, session_id, "whole", 0.0, 3.0).expect("interval");

    recording::insert_sorter_params(
        store,
        LOCAL_SORTER,
        "default",
        &serde_json::json!({ "detect_threshold": 3.0 }),
        &FilterParams::default(),
    )
    .expect("sorter params");
    sorting::insert_default_artifact_params(store).expect("artifact params");
    metrics::insert_default_metric_config(store).expect("metric config");
    curation::insert_default_curation_params(store).expect("curation params");

    RecordingKey {
        session_id: session_id.to_string(),
        sort_group_id: 0,
        interval_name: "whole".to_string(),
        sorter_name: LOCAL_SORTER.to_string(),
        param_set_name: "default".to_string(),
    }
}

pub fn seed_team(store: &Store, team: &str, members: &[(&str, Option<&str>)]) {
    access::create_team(store, team, "").expect("team");
    for (db_user, remote) in members {
        access::add_member(store, team, db_user, db_user, *remote).expect("member");
    }
}

pub fn seed_selection(store: &Store, key: &RecordingKey, team: &str) {
    sorting::insert_selection(
        store,
        &SortingSelection {
            key: key.clone(),
            artifact_params_name: "none".to_string(),
            metric_config_name: metrics::DEFAULT_METRIC_CONFIG.to_string(),
            team_name: team.to_string(),
        },
    )
    .expect("selection");
}

pub fn workspace_client(store: &Store) -> LocalWorkspace {
    LocalWorkspace::new(&store.root.join("workspaces")).expect("workspace root")
}
