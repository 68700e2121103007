//! Sorter execution: artifact masking, sorter invocation, and the root
//! entries of the sorting lineage forest.
//!
//! A sorting selection binds a recording tuple to its artifact-detection
//! parameters, metric configuration, and owning team. Running a selection
//! prepares (or reuses) the cached recording, masks artifact periods, hands
//! the result to the configured sorter, and registers a root sorting in
//! `pending_auto_curation` status.

use crate::core::broker::DbBroker;
use crate::core::engine::{self, RecordingEngine, SortingEngine, TimeSeries};
use crate::core::error::SortpipeError;
use crate::core::intervals::{self, Interval};
use crate::core::params::ArtifactDetectionParams;
use crate::core::store::Store;
use crate::stages::recording::{self, RecordingKey};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;

/// Lifecycle of a sorting in the curation forest. Transitions only move
/// forward; a child sorting starts at the stage its creating operation
/// produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurationStatus {
    PendingAutoCuration,
    AutoCurated,
    PendingManualCuration,
    ManuallyCurated,
    Finalized,
}

impl CurationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurationStatus::PendingAutoCuration => "pending_auto_curation",
            CurationStatus::AutoCurated => "auto_curated",
            CurationStatus::PendingManualCuration => "pending_manual_curation",
            CurationStatus::ManuallyCurated => "manually_curated",
            CurationStatus::Finalized => "finalized",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, SortpipeError> {
        match raw {
            "pending_auto_curation" => Ok(CurationStatus::PendingAutoCuration),
            "auto_curated" => Ok(CurationStatus::AutoCurated),
            "pending_manual_curation" => Ok(CurationStatus::PendingManualCuration),
            "manually_curated" => Ok(CurationStatus::ManuallyCurated),
            "finalized" => Ok(CurationStatus::Finalized),
            other => Err(SortpipeError::ValidationError(format!(
                "unknown curation status '{other}'"
            ))),
        }
    }
}

/// One row of the sorting lineage forest. Root sortings have no parent;
/// curation steps append children.
#[derive(Debug, Clone, PartialEq)]
pub struct SortingRecord {
    pub sorting_id: String,
    pub key: RecordingKey,
    pub parent_sorting_id: Option<String>,
    pub status: CurationStatus,
    /// unit id -> label strings attached during curation.
    pub labels: BTreeMap<i64, Vec<String>>,
    /// metric name -> unit id -> value.
    pub metrics: engine::MetricTable,
    pub sorting_path: String,
    pub time_of_sort: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortingSelection {
    pub key: RecordingKey,
    pub artifact_params_name: String,
    pub metric_config_name: String,
    pub team_name: String,
}

pub fn insert_artifact_params(
    store: &Store,
    params_name: &str,
    detection: &ArtifactDetectionParams,
) -> Result<(), SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "sorting.insert_artifact_params", |conn| {
        conn.execute(
            "INSERT OR IGNORE INTO artifact_params(params_name, params_json) VALUES(?1, ?2)",
            params![params_name, serde_json::to_string(detection)?],
        )?;
        Ok(())
    })
}

/// Seed the default (detection disabled) artifact parameter set.
pub fn insert_default_artifact_params(store: &Store) -> Result<(), SortpipeError> {
    insert_artifact_params(store, "none", &ArtifactDetectionParams::default())
}

pub fn artifact_params_for(
    conn: &Connection,
    params_name: &str,
) -> Result<ArtifactDetectionParams, SortpipeError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT params_json FROM artifact_params WHERE params_name = ?1",
            params![params_name],
            |row| row.get(0),
        )
        .optional()?;
    let raw = raw.ok_or_else(|| {
        SortpipeError::NotFound(format!("artifact parameter set '{params_name}' not found"))
    })?;
    serde_json::from_str(&raw).map_err(SortpipeError::SerdeError)
}

pub fn insert_selection(
    store: &Store,
    selection: &SortingSelection,
) -> Result<(), SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "sorting.insert_selection", |conn| {
        conn.execute(
            "INSERT OR IGNORE INTO sorting_selections(session_id, sort_group_id, interval_name,
                 sorter_name, param_set_name, artifact_params_name, metric_config_name, team_name)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                selection.key.session_id,
                selection.key.sort_group_id,
                selection.key.interval_name,
                selection.key.sorter_name,
                selection.key.param_set_name,
                selection.artifact_params_name,
                selection.metric_config_name,
                selection.team_name
            ],
        )?;
        Ok(())
    })
}

pub fn selection_for(
    conn: &Connection,
    key: &RecordingKey,
) -> Result<SortingSelection, SortpipeError> {
    conn.query_row(
        "SELECT artifact_params_name, metric_config_name, team_name FROM sorting_selections
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
            Ok(SortingSelection {
                key: key.clone(),
                artifact_params_name: row.get(0)?,
                metric_config_name: row.get(1)?,
                team_name: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| {
        SortpipeError::NotFound(format!(
            "no sorting selection registered for run '{}'",
            key.run_id()
        ))
    })
}

/// Artifact-free intervals of a prepared series.
///
/// When detection is disabled the full span is artifact-free. Otherwise a
/// sample is an artifact candidate when enough channels cross the amplitude
/// or z-score threshold; a symmetric window around each candidate is masked
/// out and the surviving timestamps are re-segmented into valid intervals.
pub fn get_no_artifact_times(
    series: &TimeSeries,
    detection: &ArtifactDetectionParams,
) -> Vec<Interval> {
    let n = series.num_samples();
    if n == 0 {
        return Vec::new();
    }
    let full_span = [series.timestamps[0], series.timestamps[n - 1]];
    if detection.disabled() {
        return vec![full_span];
    }

    let nchan = series.num_channels();
    // Channel count comes from the loaded traces, never from metadata.
    let nelect_above = ((detection.proportion_above_thresh * nchan as f64).round() as usize).max(1);
    let half_window =
        (series.sampling_rate * detection.zero_window_len / 1000.0 / 2.0).round() as usize;

    // Per-channel mean and standard deviation for the z-score threshold.
    let stats: Vec<(f64, f64)> = series
        .traces
        .iter()
        .map(|trace| {
            let mean = trace.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
            let var = trace
                .iter()
                .map(|&v| {
                    let d = v as f64 - mean;
                    d * d
                })
                .sum::<f64>()
                / n as f64;
            (mean, var.sqrt())
        })
        .collect();

    let mut masked = vec![false; n];
    for s in 0..n {
        let mut above = 0usize;
        for (c, trace) in series.traces.iter().enumerate() {
            let v = trace[s] as f64;
            let amp_hit = detection.amplitude_thresh > 0.0 && v.abs() > detection.amplitude_thresh;
            let z_hit = detection.zscore_thresh > 0.0 && stats[c].1 > 0.0 && {
                ((v - stats[c].0) / stats[c].1).abs() > detection.zscore_thresh
            };
            if amp_hit || z_hit {
                above += 1;
            }
        }
        if above >= nelect_above {
            let lo = s.saturating_sub(half_window);
            let hi = (s + half_window).min(n - 1);
            for m in &mut masked[lo..=hi] {
                *m = true;
            }
        }
    }

    let survivors: Vec<f64> = series
        .timestamps
        .iter()
        .zip(&masked)
        .filter(|(_, &m)| !m)
        .map(|(&t, _)| t)
        .collect();
    intervals::get_valid_intervals(&survivors, series.sampling_rate, 1.5, 0.001)
}

/// Drop the samples of a series whose timestamps fall outside `valid`.
fn mask_series(series: &TimeSeries, valid: &[Interval]) -> TimeSeries {
    let excluded = intervals::interval_list_excludes_ind(valid, &series.timestamps);
    if excluded.is_empty() {
        return series.clone();
    }
    let drop: std::collections::HashSet<usize> = excluded.into_iter().collect();
    let keep: Vec<usize> = (0..series.num_samples())
        .filter(|i| !drop.contains(i))
        .collect();
    TimeSeries {
        channel_ids: series.channel_ids.clone(),
        sampling_rate: series.sampling_rate,
        timestamps: keep.iter().map(|&i| series.timestamps[i]).collect(),
        traces: series
            .traces
            .iter()
            .map(|trace| keep.iter().map(|&i| trace[i]).collect())
            .collect(),
        geometry: series.geometry.clone(),
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// File name of a sorting's spike-train artifact inside its run directory.
pub fn sorting_file_name(sorting_id: &str) -> String {
    format!("sorting-{sorting_id}.json")
}

/// Run the configured sorter for a selection and register the root sorting.
pub fn run_sorting(
    store: &Store,
    rec_engine: &dyn RecordingEngine,
    sort_engine: &dyn SortingEngine,
    key: &RecordingKey,
) -> Result<SortingRecord, SortpipeError> {
    let broker = DbBroker::new(store);

    let (selection, detection, sorter_params) =
        broker.with_conn("sortpipe", "sorting.resolve", |conn| {
            let selection = selection_for(conn, key)?;
            let detection = artifact_params_for(conn, &selection.artifact_params_name)?;
            let sorter_params =
                recording::sorter_params_for(conn, &key.sorter_name, &key.param_set_name)?;
            Ok((selection, detection, sorter_params))
        })?;

    if !sort_engine
        .available_sorters()
        .iter()
        .any(|s| s == &key.sorter_name)
    {
        return Err(SortpipeError::SorterExecutionError {
            sorter: key.sorter_name.clone(),
            detail: "sorter is not available in the bound engine".to_string(),
        });
    }

    let artifact = recording::prepare_recording(store, rec_engine, key)?;
    let series = recording::load_prepared(&artifact)?;

    let no_artifact = get_no_artifact_times(&series, &detection);
    let masked = mask_series(&series, &no_artifact);
    if masked.num_samples() == 0 {
        return Err(SortpipeError::InvalidIntervalError {
            interval: key.interval_name.clone(),
            detail: "artifact masking removed every sample".to_string(),
        });
    }

    let trains = sort_engine.run_sorter(&masked, &key.sorter_name, &sorter_params)?;
    let time_of_sort = unix_now();

    // File first, then the row; a crash between the two leaves an orphan
    // file for cleanup to reap, never a row without its artifact.
    let sorting_id = Ulid::new().to_string();
    let run_dir = crate::core::artifacts::create_run_dir(store, &key.run_id())?;
    let sorting_path = run_dir.join(sorting_file_name(&sorting_id));
    engine::write_spike_trains(&sorting_path, &trains)?;

    let record = SortingRecord {
        sorting_id: sorting_id.clone(),
        key: key.clone(),
        parent_sorting_id: None,
        status: CurationStatus::PendingAutoCuration,
        labels: BTreeMap::new(),
        metrics: BTreeMap::new(),
        sorting_path: sorting_path.to_string_lossy().into_owned(),
        time_of_sort,
        description: format!("{} via {}", selection.team_name, key.sorter_name),
    };

    broker.with_conn("sortpipe", "sorting.register", |conn| {
        insert_sorting(conn, &record)
    })?;

    Ok(record)
}

pub fn insert_sorting(conn: &Connection, record: &SortingRecord) -> Result<(), SortpipeError> {
    conn.execute(
        "INSERT INTO sortings(sorting_id, session_id, sort_group_id, interval_name, sorter_name,
             param_set_name, parent_sorting_id, status, labels_json, metrics_json, sorting_path,
             time_of_sort, description)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.sorting_id,
            record.key.session_id,
            record.key.sort_group_id,
            record.key.interval_name,
            record.key.sorter_name,
            record.key.param_set_name,
            record.parent_sorting_id,
            record.status.as_str(),
            serde_json::to_string(&record.labels)?,
            serde_json::to_string(&record.metrics)?,
            record.sorting_path,
            record.time_of_sort,
            record.description
        ],
    )?;
    Ok(())
}

pub fn get_sorting(conn: &Connection, sorting_id: &str) -> Result<SortingRecord, SortpipeError> {
    conn.query_row(
        "SELECT sorting_id, session_id, sort_group_id, interval_name, sorter_name, param_set_name,
                parent_sorting_id, status, labels_json, metrics_json, sorting_path, time_of_sort,
                description
         FROM sortings WHERE sorting_id = ?1",
        params![sorting_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, i64>(11)?,
                row.get::<_, String>(12)?,
            ))
        },
    )
    .optional()?
    .ok_or_else(|| SortpipeError::NotFound(format!("sorting '{sorting_id}' not found")))
    .and_then(row_to_record)
}

fn row_to_record(
    row: (
        String,
        String,
        i64,
        String,
        String,
        String,
        Option<String>,
        String,
        String,
        String,
        String,
        i64,
        String,
    ),
) -> Result<SortingRecord, SortpipeError> {
    let (
        sorting_id,
        session_id,
        sort_group_id,
        interval_name,
        sorter_name,
        param_set_name,
        parent_sorting_id,
        status,
        labels_json,
        metrics_json,
        sorting_path,
        time_of_sort,
        description,
    ) = row;
    Ok(SortingRecord {
        sorting_id,
        key: RecordingKey {
            session_id,
            sort_group_id,
            interval_name,
            sorter_name,
            param_set_name,
        },
        parent_sorting_id,
        status: CurationStatus::parse(&status)?,
        labels: serde_json::from_str(&labels_json)?,
        metrics: serde_json::from_str(&metrics_json)?,
        sorting_path,
        time_of_sort,
        description,
    })
}

pub fn list_sortings(
    store: &Store,
    session_id: &str,
) -> Result<Vec<SortingRecord>, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "sorting.list", |conn| {
        let mut stmt = conn.prepare(
            "SELECT sorting_id FROM sortings WHERE session_id = ?1 ORDER BY time_of_sort, sorting_id",
        )?;
        let ids = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(get_sorting(conn, &id)?);
        }
        Ok(out)
    })
}

pub fn update_status(
    conn: &Connection,
    sorting_id: &str,
    status: CurationStatus,
) -> Result<(), SortpipeError> {
    let updated = conn.execute(
        "UPDATE sortings SET status = ?2 WHERE sorting_id = ?1",
        params![sorting_id, status.as_str()],
    )?;
    if updated == 0 {
        return Err(SortpipeError::NotFound(format!(
            "sorting '{sorting_id}' not found"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_series(n: usize) -> TimeSeries {
        TimeSeries {
            channel_ids: vec![0, 1],
            sampling_rate: 1000.0,
            timestamps: (0..n).map(|i| i as f64 * 0.001).collect(),
            traces: vec![vec![0.0; n], vec![0.0; n]],
            geometry: vec![[0.0, 0.0], [0.0, 1.0]],
        }
    }

    #[test]
    fn disabled_detection_returns_full_span() {
        let series = flat_series(2000);
        let detection = ArtifactDetectionParams::default();
        let ivs = get_no_artifact_times(&series, &detection);
        assert_eq!(ivs.len(), 1);
        assert!((ivs[0][0] - series.timestamps[0]).abs() < 1e-12);
        assert!((ivs[0][1] - series.timestamps[1999]).abs() < 1e-12);
    }

    #[test]
    fn amplitude_spike_is_masked_out() {
        let mut series = flat_series(2000);
        // Spike on both channels mid-recording.
        series.traces[0][1000] = 500.0;
        series.traces[1][1000] = 500.0;
        let detection = ArtifactDetectionParams {
            skip: false,
            amplitude_thresh: 100.0,
            zscore_thresh: -1.0,
            proportion_above_thresh: 1.0,
            zero_window_len: 10.0,
        };
        let ivs = get_no_artifact_times(&series, &detection);
        assert_eq!(ivs.len(), 2);
        // The spike timestamp is inside neither surviving interval.
        let t = series.timestamps[1000];
        assert!(ivs.iter().all(|iv| t < iv[0] || t > iv[1]));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            CurationStatus::PendingAutoCuration,
            CurationStatus::AutoCurated,
            CurationStatus::PendingManualCuration,
            CurationStatus::ManuallyCurated,
            CurationStatus::Finalized,
        ] {
            assert_eq!(CurationStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(CurationStatus::parse("bogus").is_err());
    }
}
