//! Tagged parameter variants for each configurable stage.
//!
//! The pipeline stores parameters as named rows; the payload of each row is
//! one of these closed structs, validated at the boundary before it is
//! handed to an engine capability. Free-form dictionaries are reserved for
//! the sorter itself, whose parameter space is owned by the external
//! algorithm.

use serde::{Deserialize, Serialize};

/// Bandpass filter parameters, shared between recording preparation and the
/// whitening chunk size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterParams {
    /// High-pass cutoff in Hz.
    pub frequency_min: f64,
    /// Low-pass cutoff in Hz.
    pub frequency_max: f64,
    /// Number of filter coefficients.
    pub filter_width: usize,
    /// Chunk size for filtering and whitening.
    pub filter_chunk_size: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            frequency_min: 300.0,
            frequency_max: 6000.0,
            filter_width: 1000,
            filter_chunk_size: 2_000_000,
        }
    }
}

/// Artifact-period detection parameters. Thresholds <= 0 are ignored; when
/// `skip` is set (or both thresholds are disabled) detection is a no-op and
/// the full interval is treated as artifact-free.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArtifactDetectionParams {
    pub skip: bool,
    pub zscore_thresh: f64,
    pub amplitude_thresh: f64,
    /// Minimum proportion of channels that must cross threshold at a sample
    /// for it to count as an artifact.
    pub proportion_above_thresh: f64,
    /// Width of the zeroed window in milliseconds (half on each side of the
    /// crossing).
    pub zero_window_len: f64,
}

impl Default for ArtifactDetectionParams {
    fn default() -> Self {
        Self {
            skip: true,
            zscore_thresh: -1.0,
            amplitude_thresh: -1.0,
            proportion_above_thresh: 1.0,
            zero_window_len: 1.0,
        }
    }
}

impl ArtifactDetectionParams {
    /// Detection is disabled when explicitly skipped or when neither
    /// threshold is set.
    pub fn disabled(&self) -> bool {
        self.skip || (self.zscore_thresh <= 0.0 && self.amplitude_thresh <= 0.0)
    }
}

/// Shared numeric parameters for quality-metric computation, passed to the
/// engine alongside the selected metric names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricParams {
    /// Interspike-interval threshold in seconds for the ISI metric.
    pub isi_threshold: f64,
    pub max_spikes_per_unit_for_snr: usize,
    pub max_spikes_per_unit_for_noise_overlap: usize,
    pub noise_overlap_num_features: usize,
    pub noise_overlap_num_knn: usize,
    pub max_spikes_for_nn: usize,
    pub n_neighbors: usize,
    pub max_spikes_per_unit: usize,
    /// RNG seed for reproducible subsampling.
    pub seed: u64,
}

impl Default for MetricParams {
    fn default() -> Self {
        Self {
            isi_threshold: 0.003,
            max_spikes_per_unit_for_snr: 1000,
            max_spikes_per_unit_for_noise_overlap: 1000,
            noise_overlap_num_features: 5,
            noise_overlap_num_knn: 1,
            max_spikes_for_nn: 1000,
            n_neighbors: 4,
            max_spikes_per_unit: 2000,
            seed: 47,
        }
    }
}

/// Automatic-curation reject rule. Empty (no threshold) disables the rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RejectParams {
    /// Drop units whose ISI-violation fraction exceeds this threshold.
    pub isi_violation_frac_threshold: Option<f64>,
}

impl RejectParams {
    pub fn disabled(&self) -> bool {
        self.isi_violation_frac_threshold.is_none()
    }
}

/// Automatic-curation merge rule. Unit merging is not implemented; the only
/// accepted value is the empty rule, which reports "no merge performed" so
/// callers reuse parent metrics unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct MergeParams {
    pub merge_groups: Vec<Vec<i64>>,
}

impl MergeParams {
    pub fn disabled(&self) -> bool {
        self.merge_groups.is_empty()
    }
}
