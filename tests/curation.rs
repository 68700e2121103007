mod common;

use sortpipe::core::engine::{self, LocalEngine};
use sortpipe::core::error::SortpipeError;
use sortpipe::core::workspace::SortingCuration;
use sortpipe::stages::sorting::CurationStatus;
use sortpipe::stages::{curation, finalize, metrics, sorting};
use std::collections::BTreeMap;
use std::path::Path;

fn labels(entries: &[(i64, &[&str])]) -> BTreeMap<i64, Vec<String>> {
    entries
        .iter()
        .map(|(u, ls)| (*u, ls.iter().map(|s| s.to_string()).collect()))
        .collect()
}

fn sorted_root(store: &sortpipe::core::store::Store) -> sortpipe::stages::sorting::SortingRecord {
    let key = common::seed_session(store, "sess");
    common::seed_team(store, "lab", &[("alice", Some("alice@ws"))]);
    common::seed_selection(store, &key, "lab");
    let record = sorting::run_sorting(store, &LocalEngine, &LocalEngine, &key).expect("sort");
    metrics::compute_metrics(store, &LocalEngine, &record.sorting_id).expect("metrics");
    record
}

#[test]
fn sorter_run_registers_a_pending_root() {
    let (_tmp, store) = common::setup_store();
    let record = sorted_root(&store);

    assert_eq!(record.status, CurationStatus::PendingAutoCuration);
    assert!(record.parent_sorting_id.is_none());
    let trains = engine::read_spike_trains(Path::new(&record.sorting_path)).expect("trains");
    // One unit per channel of sort group 0, five spikes each.
    assert_eq!(trains.unit_ids(), vec![0, 1]);
    assert!(trains.units.values().all(|t| t.len() == 5));
}

#[test]
fn unknown_sorter_is_rejected_before_any_row_lands() {
    let (_tmp, store) = common::setup_store();
    let mut key = common::seed_session(&store, "sess");
    common::seed_team(&store, "lab", &[("alice", None)]);

    key.sorter_name = "bogus".to_string();
    sortpipe::stages::recording::insert_sorter_params(
        &store,
        "bogus",
        "default",
        &serde_json::json!({}),
        &sortpipe::core::params::FilterParams::default(),
    )
    .expect("params");
    common::seed_selection(&store, &key, "lab");

    let err =
        sorting::run_sorting(&store, &LocalEngine, &LocalEngine, &key).expect_err("must fail");
    assert!(matches!(err, SortpipeError::SorterExecutionError { .. }));
    assert!(sorting::list_sortings(&store, "sess").expect("list").is_empty());
}

#[test]
fn auto_curation_rejects_by_isi_threshold() {
    let (_tmp, store) = common::setup_store();
    let root = sorted_root(&store);

    curation::insert_curation_params(
        &store,
        "strict",
        &sortpipe::core::params::MergeParams::default(),
        &sortpipe::core::params::RejectParams {
            isi_violation_frac_threshold: Some(0.5),
        },
    )
    .expect("params");

    let child = curation::auto_curate(&store, &root.sorting_id, "strict").expect("auto");
    assert_eq!(child.status, CurationStatus::AutoCurated);
    assert_eq!(child.parent_sorting_id.as_deref(), Some(root.sorting_id.as_str()));
    // Fixture units have zero ISI violations, so all survive.
    let trains = engine::read_spike_trains(Path::new(&child.sorting_path)).expect("trains");
    assert_eq!(trains.unit_ids(), vec![0, 1]);
    // Surviving units keep their parent metric values.
    assert_eq!(child.metrics["isi_violation"][&0], 0.0);
}

#[test]
fn auto_curation_requires_metrics_when_rejecting() {
    let (_tmp, store) = common::setup_store();
    let key = common::seed_session(&store, "sess");
    common::seed_team(&store, "lab", &[("alice", None)]);
    common::seed_selection(&store, &key, "lab");
    let root = sorting::run_sorting(&store, &LocalEngine, &LocalEngine, &key).expect("sort");

    curation::insert_curation_params(
        &store,
        "strict",
        &sortpipe::core::params::MergeParams::default(),
        &sortpipe::core::params::RejectParams {
            isi_violation_frac_threshold: Some(0.5),
        },
    )
    .expect("params");

    // Metrics were never computed for the root.
    let err = curation::auto_curate(&store, &root.sorting_id, "strict").expect_err("must fail");
    assert!(matches!(err, SortpipeError::ValidationError(_)));
}

#[test]
fn nonempty_merge_rules_are_rejected_as_unimplemented() {
    let (_tmp, store) = common::setup_store();
    common::seed_session(&store, "sess");

    let err = curation::insert_curation_params(
        &store,
        "merge",
        &sortpipe::core::params::MergeParams {
            merge_groups: vec![vec![0, 1]],
        },
        &sortpipe::core::params::RejectParams::default(),
    )
    .expect_err("must fail");
    assert!(matches!(err, SortpipeError::ValidationError(_)));
}

#[test]
fn publish_is_idempotent_and_grants_team_permissions() {
    let (_tmp, store) = common::setup_store();
    let root = sorted_root(&store);
    let client = common::workspace_client(&store);

    let row = curation::publish_for_manual_curation(&store, &client, &root.sorting_id)
        .expect("publish");
    let again = curation::publish_for_manual_curation(&store, &client, &root.sorting_id)
        .expect("republish");
    assert_eq!(row, again);

    assert!(client
        .user_can_edit(&row.workspace_uri, "alice@ws")
        .expect("perm"));
    let republished = sortpipe::core::broker::DbBroker::new(&store)
        .with_conn("test", "test.status", |conn| {
            sorting::get_sorting(conn, &root.sorting_id)
        })
        .expect("get");
    assert_eq!(republished.status, CurationStatus::PendingManualCuration);
}

#[test]
fn import_restricts_to_accepted_units() {
    let (_tmp, store) = common::setup_store();
    let root = sorted_root(&store);
    let client = common::workspace_client(&store);
    let row = curation::publish_for_manual_curation(&store, &client, &root.sorting_id)
        .expect("publish");

    client
        .set_sorting_curation(
            &row.workspace_uri,
            &SortingCuration {
                labels_by_unit: labels(&[(0, &["accept"]), (1, &["mua"])]),
                merge_groups: vec![],
            },
        )
        .expect("curation");

    let child = curation::import_manual_curation(&store, &LocalEngine, &client, &root.sorting_id)
        .expect("import")
        .expect("child");
    assert_eq!(child.status, CurationStatus::ManuallyCurated);
    let trains = engine::read_spike_trains(Path::new(&child.sorting_path)).expect("trains");
    assert_eq!(trains.unit_ids(), vec![0]);
    // No merge happened, so metrics are the parent's values restricted.
    assert_eq!(child.metrics["num_spikes"][&0], 5.0);
    assert!(!child.metrics["num_spikes"].contains_key(&1));
}

#[test]
fn fully_accepted_merge_collapses_to_the_primary_and_recomputes() {
    let (_tmp, store) = common::setup_store();
    let root = sorted_root(&store);
    let client = common::workspace_client(&store);
    let row = curation::publish_for_manual_curation(&store, &client, &root.sorting_id)
        .expect("publish");

    client
        .set_sorting_curation(
            &row.workspace_uri,
            &SortingCuration {
                labels_by_unit: labels(&[(0, &["accept"]), (1, &["accept"])]),
                merge_groups: vec![vec![0, 1]],
            },
        )
        .expect("curation");

    let child = curation::import_manual_curation(&store, &LocalEngine, &client, &root.sorting_id)
        .expect("import")
        .expect("child");
    let trains = engine::read_spike_trains(Path::new(&child.sorting_path)).expect("trains");
    assert_eq!(trains.unit_ids(), vec![0]);
    // Recomputed table covers exactly the surviving unit.
    assert_eq!(child.metrics["num_spikes"].len(), 1);
    assert_eq!(child.metrics["num_spikes"][&0], 5.0);
}

#[test]
fn empty_acceptance_imports_nothing() {
    let (_tmp, store) = common::setup_store();
    let root = sorted_root(&store);
    let client = common::workspace_client(&store);
    let row = curation::publish_for_manual_curation(&store, &client, &root.sorting_id)
        .expect("publish");

    client
        .set_sorting_curation(
            &row.workspace_uri,
            &SortingCuration {
                labels_by_unit: labels(&[(0, &["mua"])]),
                merge_groups: vec![],
            },
        )
        .expect("curation");

    let before = sorting::list_sortings(&store, "sess").expect("list").len();
    let out = curation::import_manual_curation(&store, &LocalEngine, &client, &root.sorting_id)
        .expect("import");
    assert!(out.is_none());
    assert_eq!(sorting::list_sortings(&store, "sess").expect("list").len(), before);
}

#[test]
fn collapse_that_empties_the_accepted_set_imports_nothing() {
    let (_tmp, store) = common::setup_store();
    let root = sorted_root(&store);
    let client = common::workspace_client(&store);
    let row = curation::publish_for_manual_curation(&store, &client, &root.sorting_id)
        .expect("publish");

    // Only the non-primary member of the merge group is accepted, so the
    // collapse absorbs it into the unaccepted primary and nothing survives.
    client
        .set_sorting_curation(
            &row.workspace_uri,
            &SortingCuration {
                labels_by_unit: labels(&[(1, &["accept"])]),
                merge_groups: vec![vec![0, 1]],
            },
        )
        .expect("curation");

    let before = sorting::list_sortings(&store, "sess").expect("list").len();
    let out = curation::import_manual_curation(&store, &LocalEngine, &client, &root.sorting_id)
        .expect("import");
    assert!(out.is_none());
    assert_eq!(sorting::list_sortings(&store, "sess").expect("list").len(), before);
}

#[test]
fn metric_config_listing_reflects_registrations() {
    let (_tmp, store) = common::setup_store();
    common::seed_session(&store, "sess");

    metrics::insert_metric_config(
        &store,
        "minimal",
        &["num_spikes".to_string()],
        &sortpipe::core::params::MetricParams::default(),
    )
    .expect("config");

    let names = metrics::list_metric_configs(&store).expect("list");
    assert_eq!(
        names,
        vec![metrics::DEFAULT_METRIC_CONFIG.to_string(), "minimal".to_string()]
    );
}

#[test]
fn finalize_projects_units_and_lineage_stays_traceable() {
    let (_tmp, store) = common::setup_store();
    let root = sorted_root(&store);
    let client = common::workspace_client(&store);
    let row = curation::publish_for_manual_curation(&store, &client, &root.sorting_id)
        .expect("publish");
    client
        .set_sorting_curation(
            &row.workspace_uri,
            &SortingCuration {
                labels_by_unit: labels(&[(0, &["accept"]), (1, &["accept", "mua"])]),
                merge_groups: vec![],
            },
        )
        .expect("curation");
    let child = curation::import_manual_curation(&store, &LocalEngine, &client, &root.sorting_id)
        .expect("import")
        .expect("child");

    // Only manually curated sortings finalize.
    let err = finalize::finalize_sorting(&store, &root.sorting_id).expect_err("root blocked");
    assert!(matches!(err, SortpipeError::ValidationError(_)));

    let n = finalize::finalize_sorting(&store, &child.sorting_id).expect("finalize");
    assert_eq!(n, 2);
    let units = finalize::finalized_units(&store, &child.sorting_id).expect("units");
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].label, "accept");
    assert_eq!(units[0].num_spikes, 5);
    assert_eq!(units[1].label, "accept,mua");

    let included = finalize::unit_inclusion(
        &store,
        &child.sorting_id,
        &finalize::UnitInclusionCriteria {
            exclude_labels: vec!["mua".to_string()],
            ..Default::default()
        },
    )
    .expect("inclusion");
    assert_eq!(included, vec![0]);

    let chain = curation::ancestry(&store, &child.sorting_id).expect("ancestry");
    assert_eq!(chain, vec![root.sorting_id.clone(), child.sorting_id.clone()]);
    assert_eq!(
        curation::children(&store, &root.sorting_id).expect("children"),
        vec![child.sorting_id]
    );
}
