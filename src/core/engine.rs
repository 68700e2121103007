//! Capability seams for the numerical engines.
//!
//! sortpipe never implements signal processing or spike sorting itself; it
//! orchestrates opaque engine capabilities behind these traits. A production
//! deployment binds them to an external toolchain; tests bind deterministic
//! in-memory implementations.
//!
//! The data types crossing the seam (`TimeSeries`, `SpikeTrains`) are plain
//! serde structs so artifacts can be cached on disk in a stable JSON format
//! and reloaded deterministically.

use crate::core::error::SortpipeError;
use crate::core::params::{FilterParams, MetricParams};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Re-referencing policy for a sort group, decoded from the group's
/// `sort_reference_electrode_id` (-1 none, -2 common median, >=0 single).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencePolicy {
    None,
    CommonMedian,
    Single(i64),
}

impl ReferencePolicy {
    pub fn from_reference_id(id: i64) -> Self {
        match id {
            -1 => ReferencePolicy::None,
            -2 => ReferencePolicy::CommonMedian,
            n => ReferencePolicy::Single(n),
        }
    }
}

/// A multichannel time series slice, one trace row per channel.
///
/// Timestamps are explicit rather than derived from sample index: slicing
/// moves the zero point, and downstream spike times are expressed in
/// recording time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSeries {
    pub channel_ids: Vec<i64>,
    pub sampling_rate: f64,
    pub timestamps: Vec<f64>,
    pub traces: Vec<Vec<f32>>,
    pub geometry: Vec<[f64; 2]>,
}

impl TimeSeries {
    pub fn num_channels(&self) -> usize {
        self.channel_ids.len()
    }

    pub fn num_samples(&self) -> usize {
        self.timestamps.len()
    }

    /// Restrict the series to the given channels, preserving their order.
    pub fn select_channels(&self, keep: &[i64]) -> Result<TimeSeries, SortpipeError> {
        let mut channel_ids = Vec::with_capacity(keep.len());
        let mut traces = Vec::with_capacity(keep.len());
        let mut geometry = Vec::with_capacity(keep.len());
        for id in keep {
            let idx = self
                .channel_ids
                .iter()
                .position(|c| c == id)
                .ok_or_else(|| {
                    SortpipeError::NotFound(format!("channel {id} not present in series"))
                })?;
            channel_ids.push(*id);
            traces.push(self.traces[idx].clone());
            if idx < self.geometry.len() {
                geometry.push(self.geometry[idx]);
            }
        }
        Ok(TimeSeries {
            channel_ids,
            sampling_rate: self.sampling_rate,
            timestamps: self.timestamps.clone(),
            traces,
            geometry,
        })
    }
}

/// Per-unit spike times (seconds, recording time).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SpikeTrains {
    pub units: BTreeMap<i64, Vec<f64>>,
}

impl SpikeTrains {
    pub fn unit_ids(&self) -> Vec<i64> {
        self.units.keys().copied().collect()
    }

    pub fn select_units(&self, keep: &[i64]) -> SpikeTrains {
        SpikeTrains {
            units: self
                .units
                .iter()
                .filter(|(id, _)| keep.contains(id))
                .map(|(id, v)| (*id, v.clone()))
                .collect(),
        }
    }
}

/// metric name -> unit id -> value.
pub type MetricTable = BTreeMap<String, BTreeMap<i64, f64>>;

/// Recording-side engine capability: load, slice, re-reference, filter,
/// whiten.
pub trait RecordingEngine {
    /// Full timestamp array of the source recording.
    fn timestamps(&self, source: &Path) -> Result<Vec<f64>, SortpipeError>;

    /// Load a channel/sample slice of the source recording. `sample_range`
    /// is half-open `[start, end)`.
    fn load(
        &self,
        source: &Path,
        channel_ids: &[i64],
        sample_range: (usize, usize),
    ) -> Result<TimeSeries, SortpipeError>;

    fn rereference(
        &self,
        series: TimeSeries,
        policy: ReferencePolicy,
    ) -> Result<TimeSeries, SortpipeError>;

    fn bandpass_filter(
        &self,
        series: TimeSeries,
        params: &FilterParams,
    ) -> Result<TimeSeries, SortpipeError>;

    fn whiten(
        &self,
        series: TimeSeries,
        seed: u64,
        chunk_size: usize,
    ) -> Result<TimeSeries, SortpipeError>;
}

/// Sorting-side engine capability: run a named sorter, compute a batch of
/// named quality metrics.
pub trait SortingEngine {
    fn available_sorters(&self) -> Vec<String>;

    /// Invoke the named sorter. Blocking; failures surface as
    /// `SorterExecutionError` and are never retried here.
    fn run_sorter(
        &self,
        series: &TimeSeries,
        sorter_name: &str,
        params: &serde_json::Value,
    ) -> Result<SpikeTrains, SortpipeError>;

    /// Compute all requested metrics in one batched call. Partial failure is
    /// not isolated; the whole call fails.
    fn compute_quality_metrics(
        &self,
        series: &TimeSeries,
        sorting: &SpikeTrains,
        metric_names: &[String],
        params: &MetricParams,
    ) -> Result<MetricTable, SortpipeError>;
}

/// Write a series to its stable on-disk cache format, returning the content
/// hash recorded alongside the cache row.
pub fn write_series_cache(path: &Path, series: &TimeSeries) -> Result<String, SortpipeError> {
    let bytes = serde_json::to_vec(series)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    fs::write(path, &bytes).map_err(SortpipeError::IoError)?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn read_series_cache(path: &Path) -> Result<TimeSeries, SortpipeError> {
    let raw = fs::read(path).map_err(SortpipeError::IoError)?;
    serde_json::from_slice(&raw).map_err(SortpipeError::SerdeError)
}

pub fn write_spike_trains(path: &Path, trains: &SpikeTrains) -> Result<(), SortpipeError> {
    let bytes = serde_json::to_vec(trains)?;
    fs::write(path, &bytes).map_err(SortpipeError::IoError)
}

pub fn read_spike_trains(path: &Path) -> Result<SpikeTrains, SortpipeError> {
    let raw = fs::read(path).map_err(SortpipeError::IoError)?;
    serde_json::from_slice(&raw).map_err(SortpipeError::SerdeError)
}

/// Deterministic engine backing tests and offline CLI runs, the way
/// `LocalWorkspace` stands in for the remote curation service.
///
/// Source recordings are `TimeSeries` JSON files. Transforms are crude but
/// deterministic stand-ins for real DSP: mean subtraction for the bandpass,
/// per-channel standard-deviation normalization for whitening, and a
/// positive threshold-crossing detector as the sorter.
pub struct LocalEngine;

pub const LOCAL_SORTER: &str = "threshold";

impl LocalEngine {
    fn read_source(&self, source: &Path) -> Result<TimeSeries, SortpipeError> {
        read_series_cache(source)
    }
}

impl RecordingEngine for LocalEngine {
    fn timestamps(&self, source: &Path) -> Result<Vec<f64>, SortpipeError> {
        Ok(self.read_source(source)?.timestamps)
    }

    fn load(
        &self,
        source: &Path,
        channel_ids: &[i64],
        sample_range: (usize, usize),
    ) -> Result<TimeSeries, SortpipeError> {
        let full = self.read_source(source)?;
        let mut series = full.select_channels(channel_ids)?;
        let (start, end) = sample_range;
        if end > series.num_samples() || start > end {
            return Err(SortpipeError::ValidationError(format!(
                "sample range [{start}, {end}) exceeds source length {}",
                series.num_samples()
            )));
        }
        series.timestamps = series.timestamps[start..end].to_vec();
        for trace in &mut series.traces {
            *trace = trace[start..end].to_vec();
        }
        Ok(series)
    }

    fn rereference(
        &self,
        mut series: TimeSeries,
        policy: ReferencePolicy,
    ) -> Result<TimeSeries, SortpipeError> {
        match policy {
            ReferencePolicy::None => Ok(series),
            ReferencePolicy::CommonMedian => {
                let n = series.num_samples();
                let mut medians = Vec::with_capacity(n);
                for s in 0..n {
                    let mut column: Vec<f32> =
                        series.traces.iter().map(|trace| trace[s]).collect();
                    column.sort_by(|a, b| a.total_cmp(b));
                    medians.push(column[column.len() / 2]);
                }
                for trace in &mut series.traces {
                    for (s, v) in trace.iter_mut().enumerate() {
                        *v -= medians[s];
                    }
                }
                Ok(series)
            }
            ReferencePolicy::Single(id) => {
                let idx = series
                    .channel_ids
                    .iter()
                    .position(|c| *c == id)
                    .ok_or_else(|| {
                        SortpipeError::NotFound(format!(
                            "reference channel {id} not present in loaded series"
                        ))
                    })?;
                let reference = series.traces[idx].clone();
                for trace in &mut series.traces {
                    for (s, v) in trace.iter_mut().enumerate() {
                        *v -= reference[s];
                    }
                }
                Ok(series)
            }
        }
    }

    fn bandpass_filter(
        &self,
        mut series: TimeSeries,
        _params: &FilterParams,
    ) -> Result<TimeSeries, SortpipeError> {
        let n = series.num_samples();
        if n == 0 {
            return Ok(series);
        }
        for trace in &mut series.traces {
            let mean = trace.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
            for v in trace.iter_mut() {
                *v -= mean as f32;
            }
        }
        Ok(series)
    }

    fn whiten(
        &self,
        mut series: TimeSeries,
        _seed: u64,
        _chunk_size: usize,
    ) -> Result<TimeSeries, SortpipeError> {
        let n = series.num_samples();
        if n == 0 {
            return Ok(series);
        }
        for trace in &mut series.traces {
            let mean = trace.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
            let var = trace
                .iter()
                .map(|&v| {
                    let d = v as f64 - mean;
                    d * d
                })
                .sum::<f64>()
                / n as f64;
            let std = var.sqrt();
            if std > 0.0 {
                for v in trace.iter_mut() {
                    *v = (*v as f64 / std) as f32;
                }
            }
        }
        Ok(series)
    }
}

impl SortingEngine for LocalEngine {
    fn available_sorters(&self) -> Vec<String> {
        vec![LOCAL_SORTER.to_string()]
    }

    fn run_sorter(
        &self,
        series: &TimeSeries,
        sorter_name: &str,
        params: &serde_json::Value,
    ) -> Result<SpikeTrains, SortpipeError> {
        if sorter_name != LOCAL_SORTER {
            return Err(SortpipeError::SorterExecutionError {
                sorter: sorter_name.to_string(),
                detail: format!("local engine only provides '{LOCAL_SORTER}'"),
            });
        }
        let threshold = params
            .get("detect_threshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(3.0) as f32;

        // One unit per channel: spike at each upward threshold crossing.
        let mut units = BTreeMap::new();
        for (idx, trace) in series.traces.iter().enumerate() {
            let mut times = Vec::new();
            let mut prev = f32::NEG_INFINITY;
            for (s, &v) in trace.iter().enumerate() {
                if v > threshold && prev <= threshold {
                    times.push(series.timestamps[s]);
                }
                prev = v;
            }
            units.insert(idx as i64, times);
        }
        Ok(SpikeTrains { units })
    }

    fn compute_quality_metrics(
        &self,
        series: &TimeSeries,
        sorting: &SpikeTrains,
        metric_names: &[String],
        params: &MetricParams,
    ) -> Result<MetricTable, SortpipeError> {
        let duration = match (series.timestamps.first(), series.timestamps.last()) {
            (Some(first), Some(last)) if last > first => last - first,
            _ => 1.0,
        };
        let mut table = MetricTable::new();
        for name in metric_names {
            let mut per_unit = BTreeMap::new();
            for (unit, times) in &sorting.units {
                let n = times.len();
                let value = match name.as_str() {
                    "num_spikes" => n as f64,
                    "firing_rate" => n as f64 / duration,
                    "isi_violation" => {
                        if n < 2 {
                            0.0
                        } else {
                            let violations = times
                                .windows(2)
                                .filter(|w| w[1] - w[0] < params.isi_threshold)
                                .count();
                            violations as f64 / (n - 1) as f64
                        }
                    }
                    // Stand-in scores: deterministic, bounded, monotone in
                    // spike count.
                    "snr" | "nn_hit_rate" | "nn_isolation" => n as f64 / (n as f64 + 1.0),
                    "noise_overlap" => 1.0 / (n as f64 + 1.0),
                    "peak_channel" => *unit as f64,
                    other => return Err(SortpipeError::UnknownMetricError(other.to_string())),
                };
                per_unit.insert(*unit, value);
            }
            table.insert(name.clone(), per_unit);
        }
        Ok(table)
    }
}
