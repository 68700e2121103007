//! Session, electrode, and sort-interval registration.
//!
//! A session binds a session id to the source recording file and its
//! sampling rate; electrodes carry the per-channel metadata the grouping
//! stage partitions; sort intervals name the time spans eligible for
//! sorting.

use crate::core::broker::DbBroker;
use crate::core::error::SortpipeError;
use crate::core::store::Store;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElectrodeRow {
    pub electrode_id: i64,
    pub electrode_group_name: String,
    pub probe_shank: i64,
    pub probe_electrode: i64,
    #[serde(default)]
    pub bad_channel: bool,
    #[serde(default = "default_reference")]
    pub original_reference_electrode: i64,
    #[serde(default)]
    pub rel_x: f64,
    #[serde(default)]
    pub rel_y: f64,
    #[serde(default)]
    pub rel_z: f64,
}

fn default_reference() -> i64 {
    -1
}

pub fn now_iso() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

pub fn register_session(
    store: &Store,
    session_id: &str,
    source_path: &Path,
    sampling_rate: f64,
) -> Result<(), SortpipeError> {
    if sampling_rate <= 0.0 {
        return Err(SortpipeError::ValidationError(format!(
            "sampling rate must be positive, got {sampling_rate}"
        )));
    }
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "session.register", |conn| {
        conn.execute(
            "INSERT OR IGNORE INTO sessions(session_id, source_path, sampling_rate, created_at)
             VALUES(?1, ?2, ?3, ?4)",
            params![
                session_id,
                source_path.to_string_lossy(),
                sampling_rate,
                now_iso()
            ],
        )?;
        Ok(())
    })
}

pub fn session_source(store: &Store, session_id: &str) -> Result<(String, f64), SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "session.source", |conn| {
        conn.query_row(
            "SELECT source_path, sampling_rate FROM sessions WHERE session_id = ?1",
            params![session_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )
        .optional()?
        .ok_or_else(|| SortpipeError::NotFound(format!("session '{session_id}' not registered")))
    })
}

/// Replace the electrode metadata for a session with the given rows.
pub fn import_electrodes(
    store: &Store,
    session_id: &str,
    rows: &[ElectrodeRow],
) -> Result<usize, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "session.import_electrodes", |conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM electrodes WHERE session_id = ?1",
            params![session_id],
        )?;
        for row in rows {
            tx.execute(
                "INSERT INTO electrodes(session_id, electrode_id, electrode_group_name,
                     probe_shank, probe_electrode, bad_channel,
                     original_reference_electrode, rel_x, rel_y, rel_z)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    session_id,
                    row.electrode_id,
                    row.electrode_group_name,
                    row.probe_shank,
                    row.probe_electrode,
                    row.bad_channel,
                    row.original_reference_electrode,
                    row.rel_x,
                    row.rel_y,
                    row.rel_z
                ],
            )?;
        }
        tx.commit()?;
        Ok(rows.len())
    })
}

/// Load electrode rows from a JSON file (an array of electrode objects).
pub fn electrodes_from_json(path: &Path) -> Result<Vec<ElectrodeRow>, SortpipeError> {
    let raw = fs::read_to_string(path).map_err(SortpipeError::IoError)?;
    serde_json::from_str(&raw).map_err(SortpipeError::SerdeError)
}

pub fn add_sort_interval(
    store: &Store,
    session_id: &str,
    interval_name: &str,
    start_time: f64,
    end_time: f64,
) -> Result<(), SortpipeError> {
    if end_time <= start_time {
        return Err(SortpipeError::ValidationError(format!(
            "sort interval '{interval_name}' is empty: [{start_time}, {end_time}]"
        )));
    }
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "session.add_interval", |conn| {
        conn.execute(
            "INSERT OR IGNORE INTO sort_intervals(session_id, interval_name, start_time, end_time)
             VALUES(?1, ?2, ?3, ?4)",
            params![session_id, interval_name, start_time, end_time],
        )?;
        Ok(())
    })
}

pub fn sort_interval(
    store: &Store,
    session_id: &str,
    interval_name: &str,
) -> Result<(f64, f64), SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "session.interval", |conn| {
        conn.query_row(
            "SELECT start_time, end_time FROM sort_intervals
             WHERE session_id = ?1 AND interval_name = ?2",
            params![session_id, interval_name],
            |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?)),
        )
        .optional()?
        .ok_or_else(|| {
            SortpipeError::NotFound(format!(
                "sort interval '{interval_name}' not found for session '{session_id}'"
            ))
        })
    })
}
