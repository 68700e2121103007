//! Recording preparation: filtered, re-referenced, whitened recording
//! artifacts, cached per parameter tuple.
//!
//! The cache is a correctness requirement, not an optimization: downstream
//! sorting and metrics must be reproducible against a stable recording, so
//! re-requesting the same tuple returns the existing artifact rather than
//! recomputing.

use crate::core::artifacts;
use crate::core::broker::DbBroker;
use crate::core::engine::{self, RecordingEngine, ReferencePolicy, TimeSeries};
use crate::core::error::SortpipeError;
use crate::core::intervals;
use crate::core::params::FilterParams;
use crate::core::store::Store;
use crate::stages::grouping;
use crate::stages::session;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Sanity floor against degenerate sort intervals.
pub const MIN_INTERVAL_SAMPLES: usize = 1000;

pub const RECORDING_CACHE_FILE: &str = "recording.json";

/// Composite identity of one recording-preparation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingKey {
    pub session_id: String,
    pub sort_group_id: i64,
    pub interval_name: String,
    pub sorter_name: String,
    pub param_set_name: String,
}

impl RecordingKey {
    /// Deterministic run id derived from the full tuple; doubles as the
    /// run-directory name under the storage root.
    pub fn run_id(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.session_id,
            self.interval_name,
            self.sort_group_id,
            self.sorter_name,
            self.param_set_name
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingArtifact {
    pub key: RecordingKey,
    pub recording_path: PathBuf,
    pub content_hash: String,
    pub num_samples: usize,
    pub sampling_rate: f64,
}

pub fn insert_sorter_params(
    store: &Store,
    sorter_name: &str,
    param_set_name: &str,
    params_json: &serde_json::Value,
    filter: &FilterParams,
) -> Result<(), SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "recording.insert_sorter_params", |conn| {
        conn.execute(
            "INSERT OR IGNORE INTO sorter_params(sorter_name, param_set_name, params_json, filter_json)
             VALUES(?1, ?2, ?3, ?4)",
            params![
                sorter_name,
                param_set_name,
                serde_json::to_string(params_json)?,
                serde_json::to_string(filter)?
            ],
        )?;
        Ok(())
    })
}

pub fn filter_params_for(
    conn: &Connection,
    sorter_name: &str,
    param_set_name: &str,
) -> Result<FilterParams, SortpipeError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT filter_json FROM sorter_params WHERE sorter_name = ?1 AND param_set_name = ?2",
            params![sorter_name, param_set_name],
            |row| row.get(0),
        )
        .optional()?;
    let raw = raw.ok_or_else(|| {
        SortpipeError::NotFound(format!(
            "sorter parameter set '{param_set_name}' for sorter '{sorter_name}' not found"
        ))
    })?;
    serde_json::from_str(&raw).map_err(SortpipeError::SerdeError)
}

pub fn sorter_params_for(
    conn: &Connection,
    sorter_name: &str,
    param_set_name: &str,
) -> Result<serde_json::Value, SortpipeError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT params_json FROM sorter_params WHERE sorter_name = ?1 AND param_set_name = ?2",
            params![sorter_name, param_set_name],
            |row| row.get(0),
        )
        .optional()?;
    let raw = raw.ok_or_else(|| {
        SortpipeError::NotFound(format!(
            "sorter parameter set '{param_set_name}' for sorter '{sorter_name}' not found"
        ))
    })?;
    serde_json::from_str(&raw).map_err(SortpipeError::SerdeError)
}

fn lookup_cached(
    conn: &Connection,
    key: &RecordingKey,
) -> Result<Option<RecordingArtifact>, SortpipeError> {
    let row = conn
        .query_row(
            "SELECT recording_path, content_hash, num_samples, sampling_rate FROM recordings
             WHERE session_id = ?1 AND sort_group_id = ?2 AND interval_name = ?3
               AND sorter_name = ?4 AND param_set_name = ?5",
            params![
                key.session_id,
                key.sort_group_id,
                key.interval_name,
                key.sorter_name,
                key.param_set_name
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            },
        )
        .optional()?;
    Ok(row.map(|(path, hash, num_samples, rate)| RecordingArtifact {
        key: key.clone(),
        recording_path: PathBuf::from(path),
        content_hash: hash,
        num_samples: num_samples as usize,
        sampling_rate: rate,
    }))
}

/// Cached artifact for a tuple, if one exists.
pub fn lookup_recording(
    store: &Store,
    key: &RecordingKey,
) -> Result<Option<RecordingArtifact>, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "recording.lookup", |conn| {
        lookup_cached(conn, key)
    })
}

/// Resolve a sort interval to half-open sample bounds over the source
/// timestamps, enforcing the minimum-sample floor.
pub fn resolve_interval_bounds(
    timestamps: &[f64],
    interval_name: &str,
    start_time: f64,
    end_time: f64,
) -> Result<(usize, usize), SortpipeError> {
    let start = intervals::search_sorted(timestamps, start_time);
    let end = intervals::search_sorted(timestamps, end_time);
    if end.saturating_sub(start) < MIN_INTERVAL_SAMPLES {
        return Err(SortpipeError::InvalidIntervalError {
            interval: interval_name.to_string(),
            detail: format!(
                "only {} samples fall inside (minimum {MIN_INTERVAL_SAMPLES})",
                end.saturating_sub(start)
            ),
        });
    }
    Ok((start, end))
}

/// Produce (or return from cache) the prepared recording for a key.
///
/// Pipeline: resolve interval bounds, slice channels (group members plus a
/// concrete reference electrode), re-reference and drop the reference
/// channel, bandpass filter, attach explicit timestamps and 2D geometry,
/// whiten. The result is written to the run directory before the cache row
/// is registered.
pub fn prepare_recording(
    store: &Store,
    rec_engine: &dyn RecordingEngine,
    key: &RecordingKey,
) -> Result<RecordingArtifact, SortpipeError> {
    let broker = DbBroker::new(store);

    if let Some(cached) = broker.with_conn("sortpipe", "recording.lookup", |conn| {
        lookup_cached(conn, key)
    })? {
        return Ok(cached);
    }

    let (source_path, sampling_rate) = session::session_source(store, &key.session_id)?;
    let (start_time, end_time) =
        session::sort_interval(store, &key.session_id, &key.interval_name)?;

    let (filter, members, reference_id, geometry) =
        broker.with_conn("sortpipe", "recording.params", |conn| {
            let filter = filter_params_for(conn, &key.sorter_name, &key.param_set_name)?;
            let members =
                grouping::member_electrodes(conn, &key.session_id, key.sort_group_id)?;
            if members.is_empty() {
                return Err(SortpipeError::NotFound(format!(
                    "sort group {} has no member electrodes for session '{}'",
                    key.sort_group_id, key.session_id
                )));
            }
            let reference_id: i64 = conn.query_row(
                "SELECT sort_reference_electrode_id FROM sort_groups
                 WHERE session_id = ?1 AND sort_group_id = ?2",
                params![key.session_id, key.sort_group_id],
                |row| row.get(0),
            )?;
            let geometry =
                grouping::geometry_for_group(conn, &key.session_id, key.sort_group_id)?;
            Ok((filter, members, reference_id, geometry))
        })?;

    let source = Path::new(&source_path);
    let timestamps = rec_engine.timestamps(source)?;
    let (start, end) =
        resolve_interval_bounds(&timestamps, &key.interval_name, start_time, end_time)?;

    // Slice to the group members plus, when a concrete reference electrode
    // is set, that electrode.
    let mut channel_ids = members.clone();
    if reference_id >= 0 && !channel_ids.contains(&reference_id) {
        channel_ids.push(reference_id);
    }
    let mut series = rec_engine.load(source, &channel_ids, (start, end))?;

    let policy = ReferencePolicy::from_reference_id(reference_id);
    series = rec_engine.rereference(series, policy)?;
    if let ReferencePolicy::Single(_) = policy {
        // The reference channel has served its purpose.
        series = series.select_channels(&members)?;
    }

    series = rec_engine.bandpass_filter(series, &filter)?;

    // Explicit timestamps: slicing moved the zero point, so they cannot be
    // re-derived from sample index downstream.
    series.timestamps = timestamps[start..end].to_vec();
    series.sampling_rate = sampling_rate;
    series.geometry = geometry;

    series = rec_engine.whiten(series, 0, filter.filter_chunk_size)?;

    let run_id = key.run_id();
    let run_dir = artifacts::create_run_dir(store, &run_id)?;
    let recording_path = run_dir.join(RECORDING_CACHE_FILE);
    let content_hash = engine::write_series_cache(&recording_path, &series)?;

    let artifact = RecordingArtifact {
        key: key.clone(),
        recording_path: recording_path.clone(),
        content_hash,
        num_samples: series.num_samples(),
        sampling_rate,
    };

    broker.with_conn("sortpipe", "recording.register", |conn| {
        // Another worker may have materialized the same tuple; "already
        // exists" is success.
        conn.execute(
            "INSERT OR IGNORE INTO recordings(session_id, sort_group_id, interval_name,
                 sorter_name, param_set_name, recording_path, content_hash,
                 num_samples, sampling_rate, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                key.session_id,
                key.sort_group_id,
                key.interval_name,
                key.sorter_name,
                key.param_set_name,
                artifact.recording_path.to_string_lossy(),
                artifact.content_hash,
                artifact.num_samples as i64,
                artifact.sampling_rate,
                session::now_iso()
            ],
        )?;
        Ok(())
    })?;

    Ok(artifact)
}

/// Load the cached series behind an artifact.
pub fn load_prepared(artifact: &RecordingArtifact) -> Result<TimeSeries, SortpipeError> {
    engine::read_series_cache(&artifact.recording_path)
}

/// Timestamps of the source recording restricted to a named sort interval.
pub fn get_recording_timestamps(
    store: &Store,
    rec_engine: &dyn RecordingEngine,
    session_id: &str,
    interval_name: &str,
) -> Result<Vec<f64>, SortpipeError> {
    let (source_path, _) = session::session_source(store, session_id)?;
    let (start_time, end_time) = session::sort_interval(store, session_id, interval_name)?;
    let timestamps = rec_engine.timestamps(Path::new(&source_path))?;
    let (start, end) =
        resolve_interval_bounds(&timestamps, interval_name, start_time, end_time)?;
    Ok(timestamps[start..end].to_vec())
}
