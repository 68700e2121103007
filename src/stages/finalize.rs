//! Finalization: freezing a curated sorting into queryable unit rows.
//!
//! Finalizing projects the sorting's labels and headline metrics into the
//! `units` table, one row per surviving unit, and moves the sorting to
//! `finalized` status. Missing metric values are stored as -1 so a row is
//! always present for every unit the sorting carries.

use crate::core::broker::DbBroker;
use crate::core::engine;
use crate::core::error::SortpipeError;
use crate::core::store::Store;
use crate::stages::sorting::{self, CurationStatus};
use rusqlite::{params, Connection};
use std::path::Path;

/// One finalized unit row.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRow {
    pub sorting_id: String,
    pub unit_id: i64,
    /// Comma-joined curation labels.
    pub label: String,
    pub noise_overlap: f64,
    pub nn_hit_rate: f64,
    pub isi_violation: f64,
    pub firing_rate: f64,
    pub num_spikes: i64,
}

/// Metric-threshold filter over finalized units. Unset fields do not
/// constrain; a unit carrying any excluded label is dropped regardless of
/// its metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitInclusionCriteria {
    pub max_noise_overlap: Option<f64>,
    pub min_nn_hit_rate: Option<f64>,
    pub max_isi_violation: Option<f64>,
    pub min_firing_rate: Option<f64>,
    pub min_num_spikes: Option<i64>,
    pub exclude_labels: Vec<String>,
}

fn metric_value(record: &sorting::SortingRecord, metric: &str, unit: i64) -> f64 {
    record
        .metrics
        .get(metric)
        .and_then(|per_unit| per_unit.get(&unit))
        .copied()
        .unwrap_or(-1.0)
}

/// Freeze a manually curated sorting into unit rows. Returns the number of
/// units written.
pub fn finalize_sorting(store: &Store, sorting_id: &str) -> Result<usize, SortpipeError> {
    let broker = DbBroker::new(store);
    let record = broker.with_conn("sortpipe", "finalize.resolve", |conn| {
        sorting::get_sorting(conn, sorting_id)
    })?;
    if record.status != CurationStatus::ManuallyCurated {
        return Err(SortpipeError::ValidationError(format!(
            "sorting '{sorting_id}' is {}; only manually curated sortings can be finalized",
            record.status.as_str()
        )));
    }

    let trains = engine::read_spike_trains(Path::new(&record.sorting_path))?;
    let unit_ids = trains.unit_ids();

    broker.with_conn("sortpipe", "finalize.project", |conn| {
        let tx = conn.unchecked_transaction()?;
        // Re-finalizing replaces prior rows.
        tx.execute(
            "DELETE FROM units WHERE sorting_id = ?1",
            params![sorting_id],
        )?;
        for unit_id in &unit_ids {
            let label = record
                .labels
                .get(unit_id)
                .map(|ls| ls.join(","))
                .unwrap_or_default();
            let num_spikes = record
                .metrics
                .get("num_spikes")
                .and_then(|per_unit| per_unit.get(unit_id))
                .map(|&v| v as i64)
                .unwrap_or(-1);
            tx.execute(
                "INSERT INTO units(sorting_id, unit_id, label, noise_overlap, nn_hit_rate,
                     isi_violation, firing_rate, num_spikes)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    sorting_id,
                    unit_id,
                    label,
                    metric_value(&record, "noise_overlap", *unit_id),
                    metric_value(&record, "nn_hit_rate", *unit_id),
                    metric_value(&record, "isi_violation", *unit_id),
                    metric_value(&record, "firing_rate", *unit_id),
                    num_spikes
                ],
            )?;
        }
        tx.execute(
            "UPDATE sortings SET status = ?2 WHERE sorting_id = ?1",
            params![sorting_id, CurationStatus::Finalized.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    })?;
    Ok(unit_ids.len())
}

fn unit_rows(conn: &Connection, sorting_id: &str) -> Result<Vec<UnitRow>, SortpipeError> {
    let mut stmt = conn.prepare(
        "SELECT unit_id, label, noise_overlap, nn_hit_rate, isi_violation, firing_rate, num_spikes
         FROM units WHERE sorting_id = ?1 ORDER BY unit_id",
    )?;
    let rows = stmt.query_map(params![sorting_id], |row| {
        Ok(UnitRow {
            sorting_id: sorting_id.to_string(),
            unit_id: row.get(0)?,
            label: row.get(1)?,
            noise_overlap: row.get(2)?,
            nn_hit_rate: row.get(3)?,
            isi_violation: row.get(4)?,
            firing_rate: row.get(5)?,
            num_spikes: row.get(6)?,
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn finalized_units(store: &Store, sorting_id: &str) -> Result<Vec<UnitRow>, SortpipeError> {
    let broker = DbBroker::new(store);
    broker.with_conn("sortpipe", "finalize.units", |conn| {
        unit_rows(conn, sorting_id)
    })
}

fn passes(row: &UnitRow, criteria: &UnitInclusionCriteria) -> bool {
    let labels: Vec<&str> = row.label.split(',').filter(|l| !l.is_empty()).collect();
    if labels
        .iter()
        .any(|l| criteria.exclude_labels.iter().any(|e| e == l))
    {
        return false;
    }
    if criteria.max_noise_overlap.is_some_and(|t| row.noise_overlap > t) {
        return false;
    }
    if criteria.min_nn_hit_rate.is_some_and(|t| row.nn_hit_rate < t) {
        return false;
    }
    if criteria.max_isi_violation.is_some_and(|t| row.isi_violation > t) {
        return false;
    }
    if criteria.min_firing_rate.is_some_and(|t| row.firing_rate < t) {
        return false;
    }
    if criteria.min_num_spikes.is_some_and(|t| row.num_spikes < t) {
        return false;
    }
    true
}

/// Ids of finalized units passing the inclusion criteria.
pub fn unit_inclusion(
    store: &Store,
    sorting_id: &str,
    criteria: &UnitInclusionCriteria,
) -> Result<Vec<i64>, SortpipeError> {
    let rows = finalized_units(store, sorting_id)?;
    Ok(rows
        .iter()
        .filter(|row| passes(row, criteria))
        .map(|row| row.unit_id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(label: &str, isi: f64, spikes: i64) -> UnitRow {
        UnitRow {
            sorting_id: "s".to_string(),
            unit_id: 1,
            label: label.to_string(),
            noise_overlap: 0.1,
            nn_hit_rate: 0.9,
            isi_violation: isi,
            firing_rate: 5.0,
            num_spikes: spikes,
        }
    }

    #[test]
    fn excluded_label_blocks_inclusion() {
        let criteria = UnitInclusionCriteria {
            exclude_labels: vec!["noise".to_string(), "mua".to_string()],
            ..Default::default()
        };
        assert!(!passes(&row("accept,noise", 0.0, 100), &criteria));
        assert!(passes(&row("accept", 0.0, 100), &criteria));
    }

    #[test]
    fn thresholds_constrain_only_when_set() {
        let mut criteria = UnitInclusionCriteria::default();
        assert!(passes(&row("", 0.5, 10), &criteria));
        criteria.max_isi_violation = Some(0.1);
        assert!(!passes(&row("", 0.5, 10), &criteria));
        criteria.max_isi_violation = Some(0.9);
        criteria.min_num_spikes = Some(100);
        assert!(!passes(&row("", 0.5, 10), &criteria));
    }
}
