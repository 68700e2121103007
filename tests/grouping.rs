mod common;

use sortpipe::core::error::SortpipeError;
use sortpipe::stages::{grouping, session};

#[test]
fn by_shank_partitions_with_dense_ordered_ids() {
    let (_tmp, store) = common::setup_store();
    common::seed_session(&store, "sess");

    let groups = grouping::list_sort_groups(&store, "sess").expect("list");
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].sort_group_id, 0);
    assert_eq!(groups[0].electrode_ids, vec![0, 1]);
    assert_eq!(groups[1].sort_group_id, 1);
    assert_eq!(groups[1].electrode_ids, vec![2, 3]);
}

#[test]
fn bad_channels_are_excluded_from_groups() {
    let (_tmp, store) = common::setup_store();
    common::seed_session(&store, "sess");

    let mut rows = common::electrode_rows();
    rows[1].bad_channel = true;
    session::import_electrodes(&store, "sess", &rows).expect("electrodes");
    let groups = grouping::group_by_shank(&store, "sess").expect("group");
    assert_eq!(groups[0].electrode_ids, vec![0]);
}

#[test]
fn by_electrode_group_collapses_shanks() {
    let (_tmp, store) = common::setup_store();
    common::seed_session(&store, "sess");

    let mut rows = common::electrode_rows();
    // Split probe "a" across two shanks; collapsing must reunite them.
    rows[1].probe_shank = 1;
    session::import_electrodes(&store, "sess", &rows).expect("electrodes");

    let by_shank = grouping::group_by_shank(&store, "sess").expect("by shank");
    assert_eq!(by_shank.len(), 3);
    let by_group = grouping::group_by_electrode_group(&store, "sess").expect("by group");
    assert_eq!(by_group.len(), 2);
    assert_eq!(by_group[0].electrode_ids, vec![0, 1]);
}

#[test]
fn regrouping_is_a_full_replace() {
    let (_tmp, store) = common::setup_store();
    common::seed_session(&store, "sess");

    let first = grouping::group_by_shank(&store, "sess").expect("first");
    let second = grouping::group_by_shank(&store, "sess").expect("second");
    assert_eq!(first, second);
    assert_eq!(grouping::list_sort_groups(&store, "sess").expect("list").len(), 2);
}

#[test]
fn inconsistent_references_leave_no_partial_groups() {
    let (_tmp, store) = common::setup_store();
    common::seed_session(&store, "sess");

    let mut rows = common::electrode_rows();
    // Group "b" members disagree on their reference electrode.
    rows[2].original_reference_electrode = 0;
    rows[3].original_reference_electrode = 1;
    session::import_electrodes(&store, "sess", &rows).expect("electrodes");

    let err = grouping::group_by_shank(&store, "sess").expect_err("must fail");
    assert!(matches!(err, SortpipeError::InconsistentReferenceError { .. }));
    // The failed replace rolled back; nothing survives, not even group "a".
    assert!(grouping::list_sort_groups(&store, "sess")
        .expect("list")
        .is_empty());
}

#[test]
fn reference_overrides_apply_per_group() {
    let (_tmp, store) = common::setup_store();
    common::seed_session(&store, "sess");

    grouping::set_reference_from_list(&store, "sess", &[(0, grouping::REFERENCE_COMMON_MEDIAN)])
        .expect("override");
    let groups = grouping::list_sort_groups(&store, "sess").expect("list");
    assert_eq!(
        groups[0].sort_reference_electrode_id,
        grouping::REFERENCE_COMMON_MEDIAN
    );
    assert_eq!(groups[1].sort_reference_electrode_id, grouping::REFERENCE_NONE);

    let err = grouping::set_reference_from_list(&store, "sess", &[(99, 0)]).expect_err("missing");
    assert!(matches!(err, SortpipeError::NotFound(_)));
}

#[test]
fn geometry_keeps_the_two_informative_axes() {
    let (_tmp, store) = common::setup_store();
    common::seed_session(&store, "sess");

    // rel_x is all zero in the fixture, so y lands in the first column.
    let geometry = grouping::get_geometry(&store, "sess", 0).expect("geometry");
    assert_eq!(geometry, vec![[0.0, 0.0], [20.0, 0.0]]);
}
