//! Sort-group assignment: partitioning electrodes into units of sorting
//! work.
//!
//! Electrodes from single-shank probes (tetrodes) form one group per
//! electrode group; multi-shank probes get one group per shank. Group ids
//! are a dense 0-based sequence ordered by electrode-group name then shank
//! number, so regrouping the same session is deterministic. Regrouping is a
//! full replace: existing groups for the session are deleted first, inside
//! the same transaction, so a consistency failure leaves no partial groups.

use crate::core::broker::DbBroker;
use crate::core::error::SortpipeError;
use crate::core::store::Store;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;

/// Reference id meaning "no re-referencing".
pub const REFERENCE_NONE: i64 = -1;
/// Reference id meaning "subtract the cross-channel median".
pub const REFERENCE_COMMON_MEDIAN: i64 = -2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortGroup {
    pub session_id: String,
    pub sort_group_id: i64,
    pub sort_reference_electrode_id: i64,
    pub electrode_ids: Vec<i64>,
}

struct ElectrodeMeta {
    electrode_id: i64,
    reference: i64,
}

fn non_bad_electrodes(
    conn: &Connection,
    session_id: &str,
) -> Result<BTreeMap<(String, i64), Vec<ElectrodeMeta>>, SortpipeError> {
    let mut stmt = conn.prepare(
        "SELECT electrode_id, electrode_group_name, probe_shank, original_reference_electrode
         FROM electrodes
         WHERE session_id = ?1 AND bad_channel = 0
         ORDER BY electrode_group_name, probe_shank, electrode_id",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    // BTreeMap keeps (group name, shank) in the deterministic assignment order.
    let mut partitions: BTreeMap<(String, i64), Vec<ElectrodeMeta>> = BTreeMap::new();
    for row in rows {
        let (electrode_id, group_name, shank, reference) = row?;
        partitions
            .entry((group_name, shank))
            .or_default()
            .push(ElectrodeMeta {
                electrode_id,
                reference,
            });
    }
    Ok(partitions)
}

fn replace_groups(
    conn: &Connection,
    session_id: &str,
    partitions: BTreeMap<(String, i64), Vec<ElectrodeMeta>>,
) -> Result<Vec<SortGroup>, SortpipeError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM sort_groups WHERE session_id = ?1",
        params![session_id],
    )?;

    let mut groups = Vec::new();
    let mut sort_group_id = 0i64;
    for ((group_name, shank), members) in partitions {
        let reference = members[0].reference;
        if members.iter().any(|m| m.reference != reference) {
            // Rolls back the transaction; no partial groups survive.
            return Err(SortpipeError::InconsistentReferenceError {
                group: format!("{group_name}/shank {shank}"),
                detail: "member electrodes disagree on their reference electrode".to_string(),
            });
        }
        tx.execute(
            "INSERT INTO sort_groups(session_id, sort_group_id, sort_reference_electrode_id)
             VALUES(?1, ?2, ?3)",
            params![session_id, sort_group_id, reference],
        )?;
        let mut electrode_ids = Vec::with_capacity(members.len());
        for m in &members {
            tx.execute(
                "INSERT INTO sort_group_electrodes(session_id, sort_group_id, electrode_id)
                 VALUES(?1, ?2, ?3)",
                params![session_id, sort_group_id, m.electrode_id],
            )?;
            electrode_ids.push(m.electrode_id);
        }
        groups.push(SortGroup {
            session_id: session_id.to_string(),
            sort_group_id,
            sort_reference_electrode_id: reference,
            electrode_ids,
        });
        sort_group_id += 1;
    }
    tx.commit()?;
    Ok(groups)
}

/// Assign one sort group per (electrode group, shank), replacing any
/// existing groups for the session.
pub fn group_by_shank(store: &Store, session_id: &str) -> Result<Vec<SortGroup>, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "grouping.by_shank", |conn| {
        let partitions = non_bad_electrodes(conn, session_id)?;
        replace_groups(conn, session_id, partitions)
    })
}

/// Assign one sort group per electrode group (shanks collapsed), replacing
/// any existing groups for the session.
pub fn group_by_electrode_group(
    store: &Store,
    session_id: &str,
) -> Result<Vec<SortGroup>, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "grouping.by_group", |conn| {
        let by_shank = non_bad_electrodes(conn, session_id)?;
        let mut partitions: BTreeMap<(String, i64), Vec<ElectrodeMeta>> = BTreeMap::new();
        for ((group_name, _), members) in by_shank {
            partitions
                .entry((group_name, 0))
                .or_default()
                .extend(members);
        }
        replace_groups(conn, session_id, partitions)
    })
}

/// Bulk override of group reference electrodes: each entry is
/// `(sort_group_id, reference_electrode_id)`.
pub fn set_reference_from_list(
    store: &Store,
    session_id: &str,
    overrides: &[(i64, i64)],
) -> Result<(), SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "grouping.set_reference", |conn| {
        let tx = conn.unchecked_transaction()?;
        for (sort_group_id, reference) in overrides {
            let updated = tx.execute(
                "UPDATE sort_groups SET sort_reference_electrode_id = ?3
                 WHERE session_id = ?1 AND sort_group_id = ?2",
                params![session_id, sort_group_id, reference],
            )?;
            if updated == 0 {
                return Err(SortpipeError::NotFound(format!(
                    "sort group {sort_group_id} not found for session '{session_id}'"
                )));
            }
        }
        tx.commit()?;
        Ok(())
    })
}

pub fn list_sort_groups(store: &Store, session_id: &str) -> Result<Vec<SortGroup>, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "grouping.list", |conn| {
        let mut stmt = conn.prepare(
            "SELECT sort_group_id, sort_reference_electrode_id FROM sort_groups
             WHERE session_id = ?1 ORDER BY sort_group_id",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut groups = Vec::new();
        for row in rows {
            let (sort_group_id, reference) = row?;
            groups.push(SortGroup {
                session_id: session_id.to_string(),
                sort_group_id,
                sort_reference_electrode_id: reference,
                electrode_ids: member_electrodes(conn, session_id, sort_group_id)?,
            });
        }
        Ok(groups)
    })
}

pub fn member_electrodes(
    conn: &Connection,
    session_id: &str,
    sort_group_id: i64,
) -> Result<Vec<i64>, SortpipeError> {
    let mut stmt = conn.prepare(
        "SELECT electrode_id FROM sort_group_electrodes
         WHERE session_id = ?1 AND sort_group_id = ?2 ORDER BY electrode_id",
    )?;
    let rows = stmt.query_map(params![session_id, sort_group_id], |row| {
        row.get::<_, i64>(0)
    })?;
    let mut ids = Vec::new();
    for id in rows {
        ids.push(id?);
    }
    Ok(ids)
}

/// 2D probe-relative positions of a group's member electrodes.
///
/// Probe positions are stored in 3D; of the x,y,z axes, the first two that
/// carry any nonzero coordinate are kept, in that order. Probes are assumed
/// effectively planar: if all three axes carry information, the third is
/// dropped with a warning.
pub fn get_geometry(
    store: &Store,
    session_id: &str,
    sort_group_id: i64,
) -> Result<Vec<[f64; 2]>, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "grouping.geometry", |conn| {
        geometry_for_group(conn, session_id, sort_group_id)
    })
}

pub fn geometry_for_group(
    conn: &Connection,
    session_id: &str,
    sort_group_id: i64,
) -> Result<Vec<[f64; 2]>, SortpipeError> {
    let member_ids = member_electrodes(conn, session_id, sort_group_id)?;
    if member_ids.is_empty() {
        return Err(SortpipeError::NotFound(format!(
            "sort group {sort_group_id} has no member electrodes for session '{session_id}'"
        )));
    }

    let mut positions: Vec<[f64; 3]> = Vec::with_capacity(member_ids.len());
    for electrode_id in &member_ids {
        let pos = conn.query_row(
            "SELECT rel_x, rel_y, rel_z FROM electrodes
             WHERE session_id = ?1 AND electrode_id = ?2",
            params![session_id, electrode_id],
            |row| {
                Ok([
                    row.get::<_, f64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                ])
            },
        )?;
        positions.push(pos);
    }

    let mut geometry = vec![[0.0f64; 2]; positions.len()];
    let mut n_found = 0usize;
    for axis in 0..3 {
        if positions.iter().any(|p| p[axis] != 0.0) {
            if n_found < 2 {
                for (i, p) in positions.iter().enumerate() {
                    geometry[i][n_found] = p[axis];
                }
                n_found += 1;
            } else {
                eprintln!(
                    "warning: electrode positions for group {sort_group_id} carry three coordinates; only two are supported, dropping the third axis"
                );
            }
        }
    }
    Ok(geometry)
}
