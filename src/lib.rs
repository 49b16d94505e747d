pub mod error;
pub mod waveform;
pub mod resample;

// Source boundary (trait + suffix dispatch + reference backend)
pub mod json_source;
pub mod source;

// Script sandbox modules
pub mod sandbox;
pub mod script_diagnostics;
pub mod waveform_rhai;

// Analysis engine and per-file engine cache
pub mod engine;
pub mod registry;

pub mod cli;

pub use engine::{
    AnalysisEngine, CompleteResult, CompleteSeriesData, CounterResult, InstantResult, SeriesData,
};
pub use error::EngineError;
pub use registry::EngineRegistry;
pub use source::{SourceRegistry, WaveformSource};
pub use waveform::{SampleReducer, Waveform};
