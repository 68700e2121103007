//! Quality-metric configuration and computation.
//!
//! Metric configurations are named rows pairing a subset of the known
//! metric catalog with shared numeric parameters. Computation itself is an
//! engine capability; this stage validates the selection, feeds the engine
//! the cached recording and spike trains, and persists the resulting table
//! on the sorting row.

use crate::core::broker::DbBroker;
use crate::core::engine::{self, MetricTable, SortingEngine, SpikeTrains, TimeSeries};
use crate::core::error::SortpipeError;
use crate::core::params::MetricParams;
use crate::core::store::Store;
use crate::stages::sorting::{self, SortingRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Every metric name the engine seam is expected to honor. Configurations
/// referencing anything else are rejected at insert time.
pub const KNOWN_METRICS: &[&str] = &[
    "snr",
    "isi_violation",
    "firing_rate",
    "num_spikes",
    "noise_overlap",
    "nn_hit_rate",
    "nn_isolation",
    "peak_channel",
];

pub const DEFAULT_METRIC_CONFIG: &str = "franklab_default";

#[derive(Debug, Clone, PartialEq)]
pub struct MetricConfig {
    pub config_name: String,
    pub metric_names: Vec<String>,
    pub params: MetricParams,
}

pub fn insert_metric_config(
    store: &Store,
    config_name: &str,
    metric_names: &[String],
    metric_params: &MetricParams,
) -> Result<(), SortpipeError> {
    for name in metric_names {
        if !KNOWN_METRICS.contains(&name.as_str()) {
            return Err(SortpipeError::UnknownMetricError(name.clone()));
        }
    }
    if metric_names.is_empty() {
        return Err(SortpipeError::ValidationError(format!(
            "metric configuration '{config_name}' selects no metrics"
        )));
    }
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "metrics.insert_config", |conn| {
        conn.execute(
            "INSERT OR IGNORE INTO metric_configs(config_name, metrics_json, params_json)
             VALUES(?1, ?2, ?3)",
            params![
                config_name,
                serde_json::to_string(metric_names)?,
                serde_json::to_string(metric_params)?
            ],
        )?;
        Ok(())
    })
}

/// Seed the default configuration: the metrics projected into finalized
/// unit rows, with default numeric parameters.
pub fn insert_default_metric_config(store: &Store) -> Result<(), SortpipeError> {
    let names: Vec<String> = [
        "snr",
        "isi_violation",
        "firing_rate",
        "num_spikes",
        "noise_overlap",
        "nn_hit_rate",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    insert_metric_config(store, DEFAULT_METRIC_CONFIG, &names, &MetricParams::default())
}

pub fn metric_config_for(
    conn: &Connection,
    config_name: &str,
) -> Result<MetricConfig, SortpipeError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT metrics_json, params_json FROM metric_configs WHERE config_name = ?1",
            params![config_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (metrics_json, params_json) = row.ok_or_else(|| {
        SortpipeError::NotFound(format!("metric configuration '{config_name}' not found"))
    })?;
    Ok(MetricConfig {
        config_name: config_name.to_string(),
        metric_names: serde_json::from_str(&metrics_json)?,
        params: serde_json::from_str(&params_json)?,
    })
}

pub fn list_metric_configs(store: &Store) -> Result<Vec<String>, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "metrics.list_configs", |conn| {
        let mut stmt = conn.prepare("SELECT config_name FROM metric_configs ORDER BY config_name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    })
}

/// One batched engine call for a series/trains pair under a configuration.
pub fn compute_for_trains(
    sort_engine: &dyn SortingEngine,
    series: &TimeSeries,
    trains: &SpikeTrains,
    config: &MetricConfig,
) -> Result<MetricTable, SortpipeError> {
    sort_engine.compute_quality_metrics(series, trains, &config.metric_names, &config.params)
}

/// Compute the selection's configured metrics for a sorting and persist the
/// table on its row.
pub fn compute_metrics(
    store: &Store,
    sort_engine: &dyn SortingEngine,
    sorting_id: &str,
) -> Result<MetricTable, SortpipeError> {
    let broker = DbBroker::new(store);
    let (record, config): (SortingRecord, MetricConfig) =
        broker.with_conn("sortpipe", "metrics.resolve", |conn| {
            let record = sorting::get_sorting(conn, sorting_id)?;
            let selection = sorting::selection_for(conn, &record.key)?;
            let config = metric_config_for(conn, &selection.metric_config_name)?;
            Ok((record, config))
        })?;

    let artifact = crate::stages::recording::lookup_recording(store, &record.key)?.ok_or_else(
        || {
            SortpipeError::NotFound(format!(
                "no cached recording for run '{}'",
                record.key.run_id()
            ))
        },
    )?;
    let series = crate::stages::recording::load_prepared(&artifact)?;
    let trains = engine::read_spike_trains(Path::new(&record.sorting_path))?;

    let table = compute_for_trains(sort_engine, &series, &trains, &config)?;

    broker.with_conn("sortpipe", "metrics.store", |conn| {
        conn.execute(
            "UPDATE sortings SET metrics_json = ?2 WHERE sorting_id = ?1",
            params![sorting_id, serde_json::to_string(&table)?],
        )?;
        Ok(())
    })?;

    Ok(table)
}

/// Restrict a metric table to the given units.
pub fn restrict_metrics(table: &MetricTable, keep: &[i64]) -> MetricTable {
    table
        .iter()
        .map(|(metric, per_unit)| {
            (
                metric.clone(),
                per_unit
                    .iter()
                    .filter(|(unit, _)| keep.contains(unit))
                    .map(|(unit, value)| (*unit, *value))
                    .collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn restrict_drops_missing_units() {
        let mut table: MetricTable = BTreeMap::new();
        let mut per_unit = BTreeMap::new();
        per_unit.insert(1, 0.5);
        per_unit.insert(2, 0.8);
        per_unit.insert(3, 0.1);
        table.insert("snr".to_string(), per_unit);

        let restricted = restrict_metrics(&table, &[1, 3]);
        let snr = &restricted["snr"];
        assert_eq!(snr.len(), 2);
        assert!(snr.contains_key(&1) && snr.contains_key(&3));
    }
}
