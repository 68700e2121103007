mod common;

use sortpipe::core::access;
use sortpipe::core::engine::LocalEngine;
use sortpipe::core::error::SortpipeError;
use sortpipe::stages::sorting;

/// Two sortings owned by different teams: group 0 by "lab_a", group 1 by
/// "lab_b".
fn two_team_sortings(store: &sortpipe::core::store::Store) -> (String, String) {
    let key_a = common::seed_session(store, "sess");
    let mut key_b = key_a.clone();
    key_b.sort_group_id = 1;

    common::seed_team(store, "lab_a", &[("alice", None), ("bob", None)]);
    common::seed_team(store, "lab_b", &[("bob", None)]);
    common::seed_selection(store, &key_a, "lab_a");
    common::seed_selection(store, &key_b, "lab_b");

    let a = sorting::run_sorting(store, &LocalEngine, &LocalEngine, &key_a).expect("sort a");
    let b = sorting::run_sorting(store, &LocalEngine, &LocalEngine, &key_b).expect("sort b");
    (a.sorting_id, b.sorting_id)
}

#[test]
fn one_unauthorized_row_blocks_the_whole_batch() {
    let (_tmp, store) = common::setup_store();
    let (a, b) = two_team_sortings(&store);

    // alice is in lab_a but not lab_b.
    let err = access::delete_sortings(&store, "alice", &[a.clone(), b.clone()])
        .expect_err("must fail");
    assert!(matches!(err, SortpipeError::PermissionDeniedError(_)));
    // Nothing was deleted.
    assert_eq!(sorting::list_sortings(&store, "sess").expect("list").len(), 2);
}

#[test]
fn member_of_every_owning_team_may_delete_the_batch() {
    let (_tmp, store) = common::setup_store();
    let (a, b) = two_team_sortings(&store);

    let deleted = access::delete_sortings(&store, "bob", &[a, b]).expect("delete");
    assert_eq!(deleted, 2);
    assert!(sorting::list_sortings(&store, "sess").expect("list").is_empty());
}

#[test]
fn empty_owning_team_fails_closed() {
    let (_tmp, store) = common::setup_store();
    let key = common::seed_session(&store, "sess");
    common::seed_team(&store, "ghosts", &[]);
    common::seed_selection(&store, &key, "ghosts");
    let record = sorting::run_sorting(&store, &LocalEngine, &LocalEngine, &key).expect("sort");

    let err =
        access::delete_sortings(&store, "alice", &[record.sorting_id]).expect_err("must fail");
    assert!(matches!(err, SortpipeError::NoTeamMembersError(_)));
}

#[test]
fn unknown_team_rejects_member_addition() {
    let (_tmp, store) = common::setup_store();
    let err = access::add_member(&store, "nope", "alice", "alice", None).expect_err("must fail");
    assert!(matches!(err, SortpipeError::NotFound(_)));
}
