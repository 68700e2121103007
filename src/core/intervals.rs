//! Interval-list arithmetic shared by the recording and sorting stages.
//!
//! An interval list is an ordered set of `[start, end]` pairs in recording
//! time. Sort intervals, valid-data spans, and artifact-free spans are all
//! interval lists; stages combine them by intersection and map them back to
//! sample indices against the recording's timestamp array.

/// Closed time interval `[start, end]` in seconds.
pub type Interval = [f64; 2];

/// Intersect two interval lists. Both inputs must be sorted by start time;
/// the output is sorted and non-overlapping.
pub fn interval_list_intersect(a: &[Interval], b: &[Interval]) -> Vec<Interval> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        let start = a[i][0].max(b[j][0]);
        let end = a[i][1].min(b[j][1]);
        if start < end {
            out.push([start, end]);
        }
        if a[i][1] < b[j][1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Indices of timestamps that fall outside every interval in `valid`.
pub fn interval_list_excludes_ind(valid: &[Interval], timestamps: &[f64]) -> Vec<usize> {
    timestamps
        .iter()
        .enumerate()
        .filter(|(_, &t)| !valid.iter().any(|iv| t >= iv[0] && t <= iv[1]))
        .map(|(i, _)| i)
        .collect()
}

/// Derive contiguous valid intervals from a (sorted) timestamp array.
///
/// A new interval starts wherever the gap between consecutive timestamps
/// exceeds `gap_factor` sample periods; intervals shorter than
/// `min_length` seconds are discarded.
pub fn get_valid_intervals(
    timestamps: &[f64],
    sampling_rate: f64,
    gap_factor: f64,
    min_length: f64,
) -> Vec<Interval> {
    if timestamps.is_empty() || sampling_rate <= 0.0 {
        return Vec::new();
    }
    let max_gap = gap_factor / sampling_rate;
    let mut out = Vec::new();
    let mut start = timestamps[0];
    let mut prev = timestamps[0];
    for &t in &timestamps[1..] {
        if t - prev > max_gap {
            if prev - start >= min_length {
                out.push([start, prev]);
            }
            start = t;
        }
        prev = t;
    }
    if prev - start >= min_length {
        out.push([start, prev]);
    }
    out
}

/// Index of the first timestamp >= `t` (the insertion point that keeps the
/// array sorted). Timestamps must be ascending.
pub fn search_sorted(timestamps: &[f64], t: f64) -> usize {
    timestamps.partition_point(|&x| x < t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_overlapping_lists() {
        let a = vec![[0.0, 10.0], [20.0, 30.0]];
        let b = vec![[5.0, 25.0]];
        assert_eq!(
            interval_list_intersect(&a, &b),
            vec![[5.0, 10.0], [20.0, 25.0]]
        );
    }

    #[test]
    fn intersect_disjoint_is_empty() {
        let a = vec![[0.0, 1.0]];
        let b = vec![[2.0, 3.0]];
        assert!(interval_list_intersect(&a, &b).is_empty());
    }

    #[test]
    fn excluded_indices_outside_valid() {
        let valid = vec![[1.0, 2.0]];
        let ts = vec![0.5, 1.0, 1.5, 2.0, 2.5];
        assert_eq!(interval_list_excludes_ind(&valid, &ts), vec![0, 4]);
    }

    #[test]
    fn valid_intervals_split_on_gap() {
        // 1 kHz sampling; a 10 ms hole splits the span.
        let mut ts: Vec<f64> = (0..100).map(|i| i as f64 * 0.001).collect();
        ts.extend((0..100).map(|i| 0.2 + i as f64 * 0.001));
        let ivs = get_valid_intervals(&ts, 1000.0, 1.5, 0.01);
        assert_eq!(ivs.len(), 2);
        assert!((ivs[0][0] - 0.0).abs() < 1e-9);
        assert!((ivs[1][0] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn search_sorted_finds_insertion_point() {
        let ts = vec![0.0, 1.0, 2.0, 3.0];
        assert_eq!(search_sorted(&ts, 1.5), 2);
        assert_eq!(search_sorted(&ts, -1.0), 0);
        assert_eq!(search_sorted(&ts, 9.0), 4);
    }
}
