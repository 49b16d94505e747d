//! Cross-series alignment for compressed traces.
//!
//! Very long digital traces are mostly constant, so each series is run-length
//! compressed first, the surviving timestamps are unioned into one ascending
//! grid, and every series is resampled onto that grid by zero-order hold.
//! This bounds output size without requiring a shared native sample rate.

use crate::error::EngineError;
use crate::waveform::Waveform;

/// Ascending, de-duplicated union of all series' timestamp grids.
pub fn union_grid<'a>(series: impl IntoIterator<Item = &'a Waveform>) -> Vec<u64> {
    let mut grid: Vec<u64> = series
        .into_iter()
        .flat_map(|w| w.times().iter().copied())
        .collect();
    grid.sort_unstable();
    grid.dedup();
    grid
}

/// Resample a waveform onto a target grid by zero-order hold: for each grid
/// timestamp, take the value of the latest source sample at or before it.
/// Grid points before the source's first sample clamp to the first value.
pub fn zero_order_hold(wave: &Waveform, grid: &[u64]) -> Result<Waveform, EngineError> {
    if wave.is_empty() {
        return Err(EngineError::data_shape(
            "cannot resample an empty waveform onto a grid",
        ));
    }
    let values = grid
        .iter()
        .map(|&t| wave.value_at_or_before(t).unwrap_or_default())
        .collect();
    Waveform::new(grid.to_vec(), values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf(time: Vec<u64>, value: Vec<f64>) -> Waveform {
        Waveform::new(time, value).unwrap()
    }

    #[test]
    fn test_union_grid_sorted_deduped() {
        let a = wf(vec![0, 10, 20], vec![1.0, 2.0, 3.0]);
        let b = wf(vec![5, 10, 30], vec![4.0, 5.0, 6.0]);
        assert_eq!(union_grid([&a, &b]), vec![0, 5, 10, 20, 30]);
    }

    #[test]
    fn test_union_grid_empty() {
        assert!(union_grid(std::iter::empty::<&Waveform>()).is_empty());
    }

    #[test]
    fn test_zero_order_hold_latest_at_or_before() {
        let w = wf(vec![5, 10, 20], vec![1.0, 2.0, 3.0]);
        let grid = [0, 5, 7, 10, 15, 20, 25];
        let r = zero_order_hold(&w, &grid).unwrap();
        assert_eq!(r.times(), &grid);
        // t=0 precedes the first sample and clamps to it.
        assert_eq!(r.values(), &[1.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_zero_order_hold_empty_source_is_error() {
        assert!(zero_order_hold(&Waveform::empty(), &[0, 1]).is_err());
    }

    #[test]
    fn test_compress_then_union_round_trip() {
        // Two dense, mostly-constant series align onto one bounded grid.
        let a = wf(
            (0..8).collect(),
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0],
        );
        let b = wf((0..8).collect(), vec![2.0, 2.0, 3.0, 3.0, 3.0, 3.0, 3.0, 2.0]);
        let (ca, cb) = (a.compress(), b.compress());
        let grid = union_grid([&ca, &cb]);
        assert_eq!(grid, vec![0, 2, 3, 6, 7]);
        let ra = zero_order_hold(&ca, &grid).unwrap();
        let rb = zero_order_hold(&cb, &grid).unwrap();
        assert_eq!(ra.times(), rb.times());
        assert_eq!(ra.values(), &[0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(rb.values(), &[2.0, 3.0, 3.0, 3.0, 2.0]);
    }
}
