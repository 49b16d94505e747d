//! Waveform values: immutable, ordered time series for one trace signal.
//!
//! Waveforms are cheap to clone (`Arc`-backed arrays) and every transform
//! returns a new value. Scripts manipulate them through the bindings in
//! [`crate::waveform_rhai`].
//!
//! # Example (script)
//! ```rhai
//! let valid = W("top.valid");
//! valid.filter(|v| v != 0.0).map(|v| v * 2.0)
//! ```

use std::sync::Arc;

use crate::error::EngineError;

/// Ordered time series with `time.len() == value.len()` and non-decreasing
/// timestamps. Timestamps are simulation ticks; values are numeric and may
/// be integer-coded for digital signals.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    time: Arc<Vec<u64>>,
    value: Arc<Vec<f64>>,
}

/// Window reducer used by [`Waveform::sample`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SampleReducer {
    #[default]
    Mean,
    Min,
    Max,
    Sum,
    First,
    Last,
}

impl SampleReducer {
    /// Parse a reducer name as used by scripts (`sample(rate, "max")`).
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "mean" => Some(Self::Mean),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "sum" => Some(Self::Sum),
            "first" => Some(Self::First),
            "last" => Some(Self::Last),
            _ => None,
        }
    }

    fn reduce(self, window: &[f64]) -> f64 {
        debug_assert!(!window.is_empty());
        match self {
            Self::Mean => window.iter().sum::<f64>() / window.len() as f64,
            Self::Min => window.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => window.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Sum => window.iter().sum(),
            Self::First => window[0],
            Self::Last => window[window.len() - 1],
        }
    }
}

impl Waveform {
    /// Create a waveform, validating the length and ordering invariants.
    pub fn new(time: Vec<u64>, value: Vec<f64>) -> Result<Self, EngineError> {
        if time.len() != value.len() {
            return Err(EngineError::data_shape(format!(
                "waveform arrays differ in length: {} timestamps vs {} values",
                time.len(),
                value.len()
            )));
        }
        if time.windows(2).any(|w| w[0] > w[1]) {
            return Err(EngineError::data_shape(
                "waveform timestamps must be non-decreasing",
            ));
        }
        Ok(Self {
            time: Arc::new(time),
            value: Arc::new(value),
        })
    }

    /// An empty waveform (no samples).
    pub fn empty() -> Self {
        Self {
            time: Arc::new(Vec::new()),
            value: Arc::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn times(&self) -> &[u64] {
        &self.time
    }

    pub fn values(&self) -> &[f64] {
        &self.value
    }

    /// Block sampling: partition into windows of `rate` consecutive samples
    /// (tail partial window included) and reduce each window's values.
    ///
    /// The output timestamp per window is the first timestamp of the window,
    /// so waveforms sampled at the same rate stay co-indexed. `sample(1, _)`
    /// is the identity.
    pub fn sample(&self, rate: usize, reducer: SampleReducer) -> Self {
        if rate <= 1 || self.is_empty() {
            return self.clone();
        }
        let out_len = self.len().div_ceil(rate);
        let mut time = Vec::with_capacity(out_len);
        let mut value = Vec::with_capacity(out_len);
        for (times, values) in self.time.chunks(rate).zip(self.value.chunks(rate)) {
            time.push(times[0]);
            value.push(reducer.reduce(values));
        }
        Self {
            time: Arc::new(time),
            value: Arc::new(value),
        }
    }

    /// Keep only the `(time, value)` pairs where `predicate(value)` holds.
    pub fn filter(&self, predicate: impl Fn(f64) -> bool) -> Self {
        let mut time = Vec::new();
        let mut value = Vec::new();
        for (&t, &v) in self.time.iter().zip(self.value.iter()) {
            if predicate(v) {
                time.push(t);
                value.push(v);
            }
        }
        Self {
            time: Arc::new(time),
            value: Arc::new(value),
        }
    }

    /// Same-length series with every value transformed.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            time: self.time.clone(),
            value: Arc::new(self.value.iter().map(|&v| f(v)).collect()),
        }
    }

    /// Run-length collapse: retain only samples whose value differs from the
    /// immediately preceding sample. The first sample is always kept.
    pub fn compress(&self) -> Self {
        if self.is_empty() {
            return self.clone();
        }
        let mut time = vec![self.time[0]];
        let mut value = vec![self.value[0]];
        for i in 1..self.len() {
            if self.value[i] != self.value[i - 1] {
                time.push(self.time[i]);
                value.push(self.value[i]);
            }
        }
        Self {
            time: Arc::new(time),
            value: Arc::new(value),
        }
    }

    /// Zero-order-hold lookup: the value of the latest sample at or before
    /// `t`, clamped to the first sample for queries before it.
    ///
    /// Returns `None` only for an empty waveform.
    pub fn value_at_or_before(&self, t: u64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let idx = self.time.partition_point(|&ts| ts <= t);
        Some(self.value[idx.saturating_sub(1)])
    }

    /// Element-wise combination of two grid-aligned waveforms.
    pub fn zip_with(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Result<Self, EngineError> {
        if self.time != other.time {
            return Err(EngineError::data_shape(
                "cannot combine waveforms with different timestamp grids",
            ));
        }
        let value = self
            .value
            .iter()
            .zip(other.value.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Self {
            time: self.time.clone(),
            value: Arc::new(value),
        })
    }

    /// True when both series lie on the same timestamp grid.
    pub fn same_grid(&self, other: &Self) -> bool {
        self.time == other.time
    }

    // === Statistics (exposed to scripts) ===

    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.value.iter().sum::<f64>() / self.len() as f64
    }

    pub fn min(&self) -> f64 {
        self.value.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.value.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn sum(&self) -> f64 {
        self.value.iter().sum()
    }

    pub fn first_time(&self) -> Option<u64> {
        self.time.first().copied()
    }

    pub fn last_time(&self) -> Option<u64> {
        self.time.last().copied()
    }
}
