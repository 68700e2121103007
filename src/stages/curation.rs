//! Curation: automatic rule-based passes, workspace publication, and
//! import of human curation decisions.
//!
//! Every curation step appends a child sorting to the lineage forest; no
//! step mutates its parent's spike trains or metrics. The workspace side is
//! external and never rolled back, so publication is idempotent: the
//! workspace registry is keyed by a deterministic name and re-publishing
//! reuses the existing workspace.

use crate::core::broker::DbBroker;
use crate::core::engine;
use crate::core::error::SortpipeError;
use crate::core::params::{MergeParams, RejectParams};
use crate::core::store::Store;
use crate::core::workspace::{SortingCuration, WorkspaceClient};
use crate::core::{access, artifacts};
use crate::stages::metrics;
use crate::stages::recording;
use crate::stages::sorting::{self, CurationStatus, SortingRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use ulid::Ulid;

pub const ACCEPT_LABEL: &str = "accept";

#[derive(Debug, Clone, PartialEq)]
pub struct CurationParams {
    pub params_name: String,
    pub merge: MergeParams,
    pub reject: RejectParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRow {
    pub workspace_name: String,
    pub workspace_uri: String,
    pub recording_handle: String,
    pub sorting_handle: String,
    pub sorting_id: String,
}

pub fn insert_curation_params(
    store: &Store,
    params_name: &str,
    merge: &MergeParams,
    reject: &RejectParams,
) -> Result<(), SortpipeError> {
    if !merge.disabled() {
        return Err(SortpipeError::ValidationError(
            "automatic unit merging is not implemented; merge_groups must be empty".to_string(),
        ));
    }
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "curation.insert_params", |conn| {
        conn.execute(
            "INSERT OR IGNORE INTO curation_params(params_name, merge_json, reject_json)
             VALUES(?1, ?2, ?3)",
            params![
                params_name,
                serde_json::to_string(merge)?,
                serde_json::to_string(reject)?
            ],
        )?;
        Ok(())
    })
}

/// Seed the default parameter set: no merging, no rejection.
pub fn insert_default_curation_params(store: &Store) -> Result<(), SortpipeError> {
    insert_curation_params(
        store,
        "none",
        &MergeParams::default(),
        &RejectParams::default(),
    )
}

pub fn curation_params_for(
    conn: &Connection,
    params_name: &str,
) -> Result<CurationParams, SortpipeError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT merge_json, reject_json FROM curation_params WHERE params_name = ?1",
            params![params_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (merge_json, reject_json) = row.ok_or_else(|| {
        SortpipeError::NotFound(format!("curation parameter set '{params_name}' not found"))
    })?;
    Ok(CurationParams {
        params_name: params_name.to_string(),
        merge: serde_json::from_str(&merge_json)?,
        reject: serde_json::from_str(&reject_json)?,
    })
}

fn child_record(
    parent: &SortingRecord,
    sorting_id: String,
    status: CurationStatus,
    labels: BTreeMap<i64, Vec<String>>,
    metrics: engine::MetricTable,
    sorting_path: String,
    description: String,
) -> SortingRecord {
    SortingRecord {
        sorting_id,
        key: parent.key.clone(),
        parent_sorting_id: Some(parent.sorting_id.clone()),
        status,
        labels,
        metrics,
        sorting_path,
        time_of_sort: parent.time_of_sort,
        description,
    }
}

/// Apply the named automatic-curation rules to a sorting, appending an
/// `auto_curated` child.
///
/// The reject rule drops units whose ISI-violation fraction exceeds the
/// threshold; it requires the parent to carry an `isi_violation` metric
/// column. No merge is performed, so surviving units keep their parent
/// metric values.
pub fn auto_curate(
    store: &Store,
    sorting_id: &str,
    params_name: &str,
) -> Result<SortingRecord, SortpipeError> {
    let broker = DbBroker::new(store);
    let (parent, rules) = broker.with_conn("sortpipe", "curation.auto_resolve", |conn| {
        let parent = sorting::get_sorting(conn, sorting_id)?;
        let rules = curation_params_for(conn, params_name)?;
        Ok((parent, rules))
    })?;
    if !rules.merge.disabled() {
        return Err(SortpipeError::ValidationError(
            "automatic unit merging is not implemented; merge_groups must be empty".to_string(),
        ));
    }

    let trains = engine::read_spike_trains(Path::new(&parent.sorting_path))?;
    let mut kept: Vec<i64> = trains.unit_ids();

    if let Some(threshold) = rules.reject.isi_violation_frac_threshold {
        let isi = parent.metrics.get("isi_violation").ok_or_else(|| {
            SortpipeError::ValidationError(format!(
                "sorting '{sorting_id}' has no isi_violation metric; compute metrics before auto curation"
            ))
        })?;
        kept.retain(|unit| isi.get(unit).is_some_and(|&v| v <= threshold));
    }

    let child_trains = trains.select_units(&kept);
    let child_id = Ulid::new().to_string();
    let run_dir = artifacts::create_run_dir(store, &parent.key.run_id())?;
    let child_path = run_dir.join(sorting::sorting_file_name(&child_id));
    engine::write_spike_trains(&child_path, &child_trains)?;

    let labels = parent
        .labels
        .iter()
        .filter(|(unit, _)| kept.contains(unit))
        .map(|(unit, l)| (*unit, l.clone()))
        .collect();
    let record = child_record(
        &parent,
        child_id,
        CurationStatus::AutoCurated,
        labels,
        metrics::restrict_metrics(&parent.metrics, &kept),
        child_path.to_string_lossy().into_owned(),
        format!("auto curation ({params_name}) of {sorting_id}"),
    );

    broker.with_conn("sortpipe", "curation.auto_register", |conn| {
        sorting::insert_sorting(conn, &record)
    })?;
    Ok(record)
}

/// Deterministic workspace name for a sorting; publication idempotency keys
/// off this.
pub fn workspace_name_for(record: &SortingRecord) -> String {
    format!("{}_{}", record.key.run_id(), record.sorting_id)
}

pub fn workspace_row_for_sorting(
    conn: &Connection,
    sorting_id: &str,
) -> Result<Option<WorkspaceRow>, SortpipeError> {
    let row = conn
        .query_row(
            "SELECT workspace_name, workspace_uri, recording_handle, sorting_handle, sorting_id
             FROM workspaces WHERE sorting_id = ?1",
            params![sorting_id],
            |row| {
                Ok(WorkspaceRow {
                    workspace_name: row.get(0)?,
                    workspace_uri: row.get(1)?,
                    recording_handle: row.get(2)?,
                    sorting_handle: row.get(3)?,
                    sorting_id: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Push a sorting into a curation workspace for human review.
///
/// Re-publishing the same sorting reuses its workspace (the remote side is
/// never rolled back); metrics and permissions are re-pushed every time so
/// the workspace reflects the current database state. Afterwards the
/// sorting is `pending_manual_curation`.
pub fn publish_for_manual_curation(
    store: &Store,
    client: &dyn WorkspaceClient,
    sorting_id: &str,
) -> Result<WorkspaceRow, SortpipeError> {
    let broker = DbBroker::new(store);
    let (record, existing, team) =
        broker.with_conn("sortpipe", "curation.publish_resolve", |conn| {
            let record = sorting::get_sorting(conn, sorting_id)?;
            let existing = workspace_row_for_sorting(conn, sorting_id)?;
            let team = access::owning_team(conn, sorting_id)?;
            Ok((record, existing, team))
        })?;

    let row = match existing {
        Some(row) => row,
        None => {
            let workspace_name = workspace_name_for(&record);
            let artifact = recording::lookup_recording(store, &record.key)?.ok_or_else(|| {
                SortpipeError::NotFound(format!(
                    "no cached recording for run '{}'",
                    record.key.run_id()
                ))
            })?;
            let uri = client.create_workspace(&workspace_name)?;
            let recording_handle =
                client.add_recording(&uri, &record.key.run_id(), &artifact.recording_path)?;
            let sorting_handle = client.add_sorting(
                &uri,
                &recording_handle,
                &record.sorting_id,
                Path::new(&record.sorting_path),
            )?;
            let row = WorkspaceRow {
                workspace_name,
                workspace_uri: uri,
                recording_handle,
                sorting_handle,
                sorting_id: sorting_id.to_string(),
            };
            broker.with_conn("sortpipe", "curation.publish_register", |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO workspaces(workspace_name, workspace_uri,
                         recording_handle, sorting_handle, sorting_id)
                     VALUES(?1, ?2, ?3, ?4, ?5)",
                    params![
                        row.workspace_name,
                        row.workspace_uri,
                        row.recording_handle,
                        row.sorting_handle,
                        row.sorting_id
                    ],
                )?;
                Ok(())
            })?;
            row
        }
    };

    client.set_unit_metrics(&row.workspace_uri, &row.sorting_handle, &record.metrics)?;

    let members = broker.with_conn("sortpipe", "curation.publish_members", |conn| {
        access::team_members(conn, &team)
    })?;
    for member in &members {
        match &member.remote_user {
            Some(remote) => {
                client.set_user_permissions(&row.workspace_uri, remote, true)?;
            }
            None => {
                eprintln!(
                    "warning: team member '{}' has no workspace identity; skipping permission grant",
                    member.member_name
                );
            }
        }
    }

    broker.with_conn("sortpipe", "curation.publish_status", |conn| {
        sorting::update_status(conn, sorting_id, CurationStatus::PendingManualCuration)
    })?;
    Ok(row)
}

/// Outcome of collapsing workspace merge groups into the accepted-unit set.
struct CollapsedAcceptance {
    kept: Vec<i64>,
    merge_occurred: bool,
}

/// A merge group's non-primary members (all but the first) are absorbed
/// into the primary when every one of them is accepted; groups with an
/// unaccepted non-primary member are left alone.
fn collapse_merge_groups(curation: &SortingCuration, accepted: &[i64]) -> CollapsedAcceptance {
    let mut kept: Vec<i64> = accepted.to_vec();
    let mut merge_occurred = false;
    for group in &curation.merge_groups {
        if group.len() < 2 {
            continue;
        }
        if group[1..].iter().all(|u| accepted.contains(u)) {
            kept.retain(|u| !group[1..].contains(u));
            merge_occurred = true;
        }
    }
    kept.sort_unstable();
    kept.dedup();
    CollapsedAcceptance {
        kept,
        merge_occurred,
    }
}

/// Pull human curation decisions back from the workspace and append a
/// `manually_curated` child restricted to the accepted units.
///
/// A unit is accepted when its workspace label set contains `accept`,
/// then merge groups collapse into their primaries. An empty surviving set
/// is not an error: curation may simply be unfinished, or a collapse may
/// have absorbed every accepted unit into an unaccepted primary, so the
/// import logs and returns `None` without registering a child. Metrics are
/// recomputed only when a merge collapsed units; otherwise the parent's
/// values are reused.
pub fn import_manual_curation(
    store: &Store,
    sort_engine: &dyn engine::SortingEngine,
    client: &dyn WorkspaceClient,
    sorting_id: &str,
) -> Result<Option<SortingRecord>, SortpipeError> {
    let broker = DbBroker::new(store);
    let (parent, row, config) =
        broker.with_conn("sortpipe", "curation.import_resolve", |conn| {
            let parent = sorting::get_sorting(conn, sorting_id)?;
            let row = workspace_row_for_sorting(conn, sorting_id)?.ok_or_else(|| {
                SortpipeError::NotFound(format!(
                    "sorting '{sorting_id}' was never published to a workspace"
                ))
            })?;
            let selection = sorting::selection_for(conn, &parent.key)?;
            let config = metrics::metric_config_for(conn, &selection.metric_config_name)?;
            Ok((parent, row, config))
        })?;

    let curation = client.get_sorting_curation(&row.workspace_uri, &row.sorting_handle)?;
    let accepted: Vec<i64> = curation
        .labels_by_unit
        .iter()
        .filter(|(_, labels)| labels.iter().any(|l| l == ACCEPT_LABEL))
        .map(|(unit, _)| *unit)
        .collect();
    let collapsed = collapse_merge_groups(&curation, &accepted);
    if collapsed.kept.is_empty() {
        println!(
            "No units accepted in workspace '{}'; nothing to import",
            row.workspace_name
        );
        return Ok(None);
    }

    let trains = engine::read_spike_trains(Path::new(&parent.sorting_path))?;
    let child_trains = trains.select_units(&collapsed.kept);

    let table = if collapsed.merge_occurred {
        let artifact = recording::lookup_recording(store, &parent.key)?.ok_or_else(|| {
            SortpipeError::NotFound(format!(
                "no cached recording for run '{}'",
                parent.key.run_id()
            ))
        })?;
        let series = recording::load_prepared(&artifact)?;
        metrics::compute_for_trains(sort_engine, &series, &child_trains, &config)?
    } else {
        metrics::restrict_metrics(&parent.metrics, &collapsed.kept)
    };

    let labels: BTreeMap<i64, Vec<String>> = curation
        .labels_by_unit
        .iter()
        .filter(|(unit, _)| collapsed.kept.contains(unit))
        .map(|(unit, l)| (*unit, l.clone()))
        .collect();

    let child_id = Ulid::new().to_string();
    let run_dir = artifacts::create_run_dir(store, &parent.key.run_id())?;
    let child_path = run_dir.join(sorting::sorting_file_name(&child_id));
    engine::write_spike_trains(&child_path, &child_trains)?;

    let record = child_record(
        &parent,
        child_id,
        CurationStatus::ManuallyCurated,
        labels,
        table,
        child_path.to_string_lossy().into_owned(),
        format!("manual curation of {sorting_id}"),
    );
    broker.with_conn("sortpipe", "curation.import_register", |conn| {
        sorting::insert_sorting(conn, &record)
    })?;
    Ok(Some(record))
}

/// Ancestry of a sorting, root first, ending at the sorting itself.
pub fn ancestry(store: &Store, sorting_id: &str) -> Result<Vec<String>, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "curation.ancestry", |conn| {
        let mut chain = vec![sorting_id.to_string()];
        let mut current = sorting_id.to_string();
        loop {
            let parent: Option<String> = conn
                .query_row(
                    "SELECT parent_sorting_id FROM sortings WHERE sorting_id = ?1",
                    params![current],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| {
                    SortpipeError::NotFound(format!("sorting '{current}' not found"))
                })?;
            match parent {
                Some(p) => {
                    chain.push(p.clone());
                    current = p;
                }
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    })
}

/// Direct children of a sorting in the lineage forest.
pub fn children(store: &Store, sorting_id: &str) -> Result<Vec<String>, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "curation.children", |conn| {
        let mut stmt = conn.prepare(
            "SELECT sorting_id FROM sortings WHERE parent_sorting_id = ?1 ORDER BY sorting_id",
        )?;
        let ids = stmt
            .query_map(params![sorting_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curation_with(labels: &[(i64, &[&str])], merges: &[&[i64]]) -> SortingCuration {
        SortingCuration {
            labels_by_unit: labels
                .iter()
                .map(|(u, ls)| (*u, ls.iter().map(|s| s.to_string()).collect()))
                .collect(),
            merge_groups: merges.iter().map(|g| g.to_vec()).collect(),
        }
    }

    #[test]
    fn fully_accepted_merge_group_collapses_to_primary() {
        let curation = curation_with(&[(1, &["accept"]), (2, &["accept"])], &[&[1, 2]]);
        let out = collapse_merge_groups(&curation, &[1, 2]);
        assert_eq!(out.kept, vec![1]);
        assert!(out.merge_occurred);
    }

    #[test]
    fn collapse_into_an_unaccepted_primary_can_empty_the_set() {
        let curation = curation_with(&[(1, &["accept"])], &[&[0, 1]]);
        let out = collapse_merge_groups(&curation, &[1]);
        assert!(out.kept.is_empty());
        assert!(out.merge_occurred);
    }

    #[test]
    fn partially_accepted_merge_group_is_untouched() {
        let curation = curation_with(&[(1, &["accept"])], &[&[1, 2]]);
        let out = collapse_merge_groups(&curation, &[1]);
        assert_eq!(out.kept, vec![1]);
        assert!(!out.merge_occurred);
    }
}
