//! Analysis engine: one open trace, script execution, result normalization.
//!
//! An engine owns exactly one [`WaveformSource`] between creation and
//! `close()`. Scripts run through the sandbox and may call back into the
//! engine's loader bindings; the returned value (a single waveform or a map
//! of named waveforms) is normalized into one of three result shapes:
//!
//! - **counter**: continuous series, block-mean sampled at a fixed rate;
//! - **instant**: sparse non-zero event timestamps with magnitude discarded;
//! - **complete**: instant events plus durations taken from the original
//!   sample values.
//!
//! Script errors never invalidate the engine; the trace stays open and the
//! next analyze call proceeds normally.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::EngineError;
use crate::resample::{union_grid, zero_order_hold};
use crate::sandbox::ScriptSandbox;
use crate::script_diagnostics::wrong_result_type;
use crate::source::{SourceRegistry, WaveformSource};
use crate::waveform::{SampleReducer, Waveform};

/// One rendered series: co-indexed timestamps and values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesData {
    pub timestamps: Vec<u64>,
    pub values: Vec<f64>,
}

/// One complete-mode series: each event carries an interval duration
/// decoded from its original sample value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompleteSeriesData {
    pub timestamps: Vec<u64>,
    pub values: Vec<f64>,
    pub durations: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterResult {
    pub series: BTreeMap<String, SeriesData>,
    pub is_multiseries: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstantResult {
    pub series: BTreeMap<String, SeriesData>,
    pub is_multiseries: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompleteResult {
    pub series: BTreeMap<String, CompleteSeriesData>,
    pub is_multiseries: bool,
}

/// Normalized script output: named series in script order plus the
/// single-vs-multi flag. A bare waveform lands under the empty-string key.
struct NormalizedSeries {
    entries: Vec<(String, Waveform)>,
    is_multiseries: bool,
}

pub struct AnalysisEngine {
    file_path: PathBuf,
    /// `None` once closed; terminal state.
    sandbox: Option<ScriptSandbox>,
}

impl std::fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("file_path", &self.file_path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AnalysisEngine {
    /// Open a trace through the registry's suffix dispatch.
    pub fn open(registry: &SourceRegistry, file_path: &Path) -> Result<Self, EngineError> {
        let source = registry.open(file_path)?;
        log::info!("Opened analysis engine for {}", file_path.display());
        Ok(Self::from_source(file_path.to_path_buf(), source))
    }

    /// Build an engine around an already-opened source handle.
    pub fn from_source(file_path: PathBuf, source: Box<dyn WaveformSource>) -> Self {
        Self {
            file_path,
            sandbox: Some(ScriptSandbox::new(source)),
        }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn is_closed(&self) -> bool {
        self.sandbox.is_none()
    }

    /// Release the underlying source. Calling twice is a no-op.
    pub fn close(&mut self) {
        if let Some(sandbox) = self.sandbox.take() {
            sandbox.close_source();
            log::info!("Closed analysis engine for {}", self.file_path.display());
        }
    }

    /// Signal namespace of the open trace.
    pub fn signal_names(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.sandbox()?.host().signal_names())
    }

    fn sandbox(&self) -> Result<&ScriptSandbox, EngineError> {
        self.sandbox.as_ref().ok_or(EngineError::Closed)
    }

    /// Run the script and normalize its result into named series.
    ///
    /// Returns `None` for an empty/whitespace-only script ("no transform
    /// requested"). Enforces the cross-series consistency rule: every
    /// returned waveform must lie on the first series' timestamp grid
    /// (skipped in compressed alignment mode, which unifies grids itself).
    fn run_script(
        &self,
        script: &str,
        check_grid: bool,
    ) -> Result<Option<NormalizedSeries>, EngineError> {
        let sandbox = self.sandbox()?;
        if script.trim().is_empty() {
            return Ok(None);
        }

        let value = sandbox.eval(script).map_err(EngineError::Script)?;
        let normalized = normalize_result(value)?;

        if check_grid {
            if let Some((first_name, first)) = normalized.entries.first() {
                for (name, wave) in &normalized.entries[1..] {
                    if !wave.same_grid(first) {
                        return Err(EngineError::data_shape(format!(
                            "series {name:?} is not on the same timestamp grid as {first_name:?} \
                             (were they sampled at different rates or clocks?)"
                        )));
                    }
                }
            }
        }

        Ok(Some(normalized))
    }

    /// Counter analysis: block-mean sampling at `sample_rate`, or compressed
    /// zero-order-hold alignment onto a unioned grid when `compress` is set.
    pub fn analyze_counter(
        &self,
        script: &str,
        sample_rate: usize,
        compress: bool,
    ) -> Result<CounterResult, EngineError> {
        let Some(normalized) = self.run_script(script, !compress)? else {
            return Ok(CounterResult {
                series: BTreeMap::new(),
                is_multiseries: false,
            });
        };

        let rate = sample_rate.max(1);
        let mut series = BTreeMap::new();

        if compress {
            let compressed: Vec<(String, Waveform)> = normalized
                .entries
                .iter()
                .map(|(name, wave)| (name.clone(), wave.compress()))
                .collect();
            let grid = union_grid(compressed.iter().map(|(_, w)| w));
            for (name, wave) in compressed {
                let aligned = if grid.is_empty() {
                    Waveform::empty()
                } else {
                    zero_order_hold(&wave, &grid)?
                };
                series.insert(
                    name,
                    SeriesData {
                        timestamps: aligned.times().to_vec(),
                        values: aligned.values().to_vec(),
                    },
                );
            }
        } else {
            for (name, wave) in normalized.entries {
                let sampled = wave.sample(rate, SampleReducer::Mean);
                series.insert(
                    name,
                    SeriesData {
                        timestamps: sampled.times().to_vec(),
                        values: sampled.values().to_vec(),
                    },
                );
            }
        }

        log::debug!(
            "Counter analysis of {}: {} series, rate {rate}, compress {compress}",
            self.file_path.display(),
            series.len()
        );
        Ok(CounterResult {
            series,
            is_multiseries: normalized.is_multiseries,
        })
    }

    /// Instant analysis: keep non-zero samples, discard their magnitude.
    /// The output conveys when events occur, not how large they are.
    pub fn analyze_instant(&self, script: &str) -> Result<InstantResult, EngineError> {
        let Some(normalized) = self.run_script(script, true)? else {
            return Ok(InstantResult {
                series: BTreeMap::new(),
                is_multiseries: false,
            });
        };

        let mut series = BTreeMap::new();
        for (name, wave) in normalized.entries {
            let events = wave.filter(|v| v != 0.0);
            series.insert(
                name,
                SeriesData {
                    timestamps: events.times().to_vec(),
                    values: vec![0.0; events.len()],
                },
            );
        }
        Ok(InstantResult {
            series,
            is_multiseries: normalized.is_multiseries,
        })
    }

    /// Complete analysis: instant events plus durations equal to the
    /// original pre-flattening sample values.
    pub fn analyze_complete(&self, script: &str) -> Result<CompleteResult, EngineError> {
        let Some(normalized) = self.run_script(script, true)? else {
            return Ok(CompleteResult {
                series: BTreeMap::new(),
                is_multiseries: false,
            });
        };

        let mut series = BTreeMap::new();
        for (name, wave) in normalized.entries {
            let events = wave.filter(|v| v != 0.0);
            // Negative values saturate to zero; durations are integral.
            let durations = events.values().iter().map(|&v| v as u64).collect();
            series.insert(
                name,
                CompleteSeriesData {
                    timestamps: events.times().to_vec(),
                    values: vec![0.0; events.len()],
                    durations,
                },
            );
        }
        Ok(CompleteResult {
            series,
            is_multiseries: normalized.is_multiseries,
        })
    }
}

impl Drop for AnalysisEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Convert the script's result value into named series.
///
/// Accepts a bare `Waveform` (keyed by the empty name, single-series) or a
/// map of name to `Waveform` (multi-series, even with one entry). Anything
/// else is a caller error; a map entry that is not a waveform is a
/// data-shape error.
fn normalize_result(value: rhai::Dynamic) -> Result<NormalizedSeries, EngineError> {
    if value.is::<Waveform>() {
        let wave = value.cast::<Waveform>();
        return Ok(NormalizedSeries {
            entries: vec![(String::new(), wave)],
            is_multiseries: false,
        });
    }

    if value.is::<rhai::Map>() {
        let map = value.cast::<rhai::Map>();
        let mut entries = Vec::with_capacity(map.len());
        for (name, entry) in map {
            let type_name = entry.type_name();
            let wave = entry.try_cast::<Waveform>().ok_or_else(|| {
                EngineError::data_shape(format!(
                    "result entry {name:?} is not a waveform (got {type_name})"
                ))
            })?;
            entries.push((name.to_string(), wave));
        }
        return Ok(NormalizedSeries {
            entries,
            is_multiseries: true,
        });
    }

    Err(EngineError::Script(wrong_result_type(value.type_name())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory source for engine tests; counts reader invocations so
    /// memoization is observable.
    struct MemorySource {
        signals: HashMap<String, Waveform>,
        load_count: Arc<AtomicUsize>,
    }

    impl MemorySource {
        fn new(signals: Vec<(&str, Vec<u64>, Vec<f64>)>) -> (Self, Arc<AtomicUsize>) {
            let load_count = Arc::new(AtomicUsize::new(0));
            let signals = signals
                .into_iter()
                .map(|(name, t, v)| (name.to_string(), Waveform::new(t, v).unwrap()))
                .collect();
            (
                Self {
                    signals,
                    load_count: load_count.clone(),
                },
                load_count,
            )
        }
    }

    impl WaveformSource for MemorySource {
        fn load_wave(
            &mut self,
            signal_path: &str,
            _clock: Option<&str>,
        ) -> Result<Waveform, EngineError> {
            self.load_count.fetch_add(1, Ordering::SeqCst);
            self.signals
                .get(signal_path)
                .cloned()
                .ok_or_else(|| EngineError::source(format!("signal not found: {signal_path}")))
        }

        fn signal_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self.signals.keys().cloned().collect();
            names.sort();
            names
        }

        fn close(&mut self) {}
    }

    fn engine_with(signals: Vec<(&str, Vec<u64>, Vec<f64>)>) -> (AnalysisEngine, Arc<AtomicUsize>) {
        let (source, count) = MemorySource::new(signals);
        (
            AnalysisEngine::from_source(PathBuf::from("test.mem"), Box::new(source)),
            count,
        )
    }

    fn counter_signals() -> Vec<(&'static str, Vec<u64>, Vec<f64>)> {
        vec![
            ("top.a", vec![0, 1, 2, 3], vec![1.0, 2.0, 3.0, 4.0]),
            ("top.b", vec![0, 1, 2, 3], vec![4.0, 3.0, 2.0, 1.0]),
        ]
    }

    #[test]
    fn test_counter_single_series_empty_key() {
        let (engine, _) = engine_with(counter_signals());
        let result = engine.analyze_counter("W(\"top.a\")", 2, false).unwrap();
        assert!(!result.is_multiseries);
        let series = result.series.get("").unwrap();
        assert_eq!(series.timestamps, vec![0, 2]);
        assert_eq!(series.values, vec![1.5, 3.5]);
    }

    #[test]
    fn test_counter_one_entry_map_is_multiseries() {
        let (engine, _) = engine_with(counter_signals());
        let result = engine
            .analyze_counter("#{ x: W(\"top.a\") }", 1, false)
            .unwrap();
        assert!(result.is_multiseries);
        assert!(result.series.contains_key("x"));
        assert_eq!(result.series.len(), 1);
    }

    #[test]
    fn test_counter_multiseries_shared_grid() {
        let (engine, _) = engine_with(counter_signals());
        let result = engine
            .analyze_counter("MW(\"top\\\\..*\")", 2, false)
            .unwrap();
        assert!(result.is_multiseries);
        assert_eq!(result.series.len(), 2);
        let a = &result.series["top.a"];
        let b = &result.series["top.b"];
        assert_eq!(a.timestamps, b.timestamps);
    }

    #[test]
    fn test_counter_grid_mismatch_is_data_shape_error() {
        let (engine, _) = engine_with(vec![
            ("top.a", vec![0, 1, 2, 3], vec![1.0; 4]),
            ("top.b", vec![0, 2, 4, 6], vec![2.0; 4]),
        ]);
        let err = engine
            .analyze_counter("MW(\"top\\\\..*\")", 1, false)
            .unwrap_err();
        assert!(matches!(err, EngineError::DataShape { .. }));
    }

    #[test]
    fn test_counter_compressed_alignment_unions_grids() {
        let (engine, _) = engine_with(vec![
            ("top.a", vec![0, 1, 2, 3], vec![0.0, 0.0, 1.0, 1.0]),
            ("top.b", vec![0, 2, 4, 6], vec![5.0, 5.0, 6.0, 6.0]),
        ]);
        // Different native grids are fine in compressed mode.
        let result = engine.analyze_counter("MW(\"top\\\\..*\")", 1, true).unwrap();
        let a = &result.series["top.a"];
        let b = &result.series["top.b"];
        assert_eq!(a.timestamps, b.timestamps);
        assert_eq!(a.timestamps, vec![0, 2, 4]);
        // Zero-order hold over the union grid.
        assert_eq!(a.values, vec![0.0, 1.0, 1.0]);
        assert_eq!(b.values, vec![5.0, 5.0, 6.0]);
    }

    #[test]
    fn test_instant_flattens_values() {
        let (engine, _) = engine_with(vec![(
            "top.irq",
            vec![0, 1, 2, 3, 4, 5],
            vec![0.0, 3.0, 0.0, 0.0, 7.0, 0.0],
        )]);
        let result = engine.analyze_instant("W(\"top.irq\")").unwrap();
        let series = result.series.get("").unwrap();
        assert_eq!(series.timestamps, vec![1, 4]);
        assert_eq!(series.values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_complete_durations_from_original_values() {
        // Scenario from the observed behavior: value encodes interval length.
        let (engine, _) = engine_with(vec![(
            "top.busy",
            vec![0, 1, 2, 3, 4, 5],
            vec![0.0, 0.0, 5.0, 5.0, 5.0, 0.0],
        )]);
        let result = engine.analyze_complete("W(\"top.busy\")").unwrap();
        let series = result.series.get("").unwrap();
        assert_eq!(series.timestamps, vec![2, 3, 4]);
        assert_eq!(series.durations, vec![5, 5, 5]);
        assert_eq!(series.values, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_empty_script_is_no_transform() {
        let (engine, count) = engine_with(counter_signals());
        let result = engine.analyze_counter("   \n  ", 1, false).unwrap();
        assert!(result.series.is_empty());
        assert!(!result.is_multiseries);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wrong_result_type_is_script_error() {
        let (engine, _) = engine_with(counter_signals());
        let err = engine.analyze_counter("42", 1, false).unwrap_err();
        assert!(matches!(err, EngineError::Script(_)));
    }

    #[test]
    fn test_non_waveform_map_entry_is_data_shape_error() {
        let (engine, _) = engine_with(counter_signals());
        let err = engine
            .analyze_counter("#{ x: W(\"top.a\"), y: 3 }", 1, false)
            .unwrap_err();
        assert!(matches!(err, EngineError::DataShape { .. }));
    }

    #[test]
    fn test_loader_memoization_across_runs() {
        let (engine, count) = engine_with(counter_signals());
        engine.analyze_counter("W(\"top.a\")", 1, false).unwrap();
        engine.analyze_counter("W(\"top.a\")", 1, false).unwrap();
        engine
            .analyze_counter("W(\"top.a\").scale(2.0)", 1, false)
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_script_error_keeps_engine_usable() {
        let (engine, _) = engine_with(counter_signals());
        assert!(engine.analyze_counter("W(\"nope\")", 1, false).is_err());
        // The trace is still open; the next run succeeds.
        assert!(engine.analyze_counter("W(\"top.a\")", 1, false).is_ok());
    }

    #[test]
    fn test_closed_engine_fails_loudly() {
        let (mut engine, _) = engine_with(counter_signals());
        engine.close();
        engine.close(); // idempotent
        let err = engine.analyze_counter("W(\"top.a\")", 1, false).unwrap_err();
        assert!(matches!(err, EngineError::Closed));
        assert!(matches!(engine.analyze_instant("x"), Err(EngineError::Closed)));
        assert!(matches!(engine.analyze_complete("x"), Err(EngineError::Closed)));
    }

    #[test]
    fn test_sample_rate_default_behavior() {
        let (engine, _) = engine_with(counter_signals());
        // Rate 1 (and a defensive 0) return the series untouched.
        let r1 = engine.analyze_counter("W(\"top.a\")", 1, false).unwrap();
        let r0 = engine.analyze_counter("W(\"top.a\")", 0, false).unwrap();
        assert_eq!(r1.series[""].values, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(r0, r1);
    }
}
