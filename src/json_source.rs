//! JSON reference trace backend.
//!
//! A plain-text trace format used by the CLI and tests:
//!
//! ```json
//! {
//!   "signals": {
//!     "top.clk":   { "time": [0, 1, 2], "value": [0, 1, 0] },
//!     "top.count": { "time": [0, 1, 2], "value": [0, 0, 1] }
//!   }
//! }
//! ```
//!
//! Binary formats (VCD, FSDB) are decoded by embedder-registered backends;
//! this one exists so the engine is exercisable end to end without them.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;

use crate::error::EngineError;
use crate::resample::zero_order_hold;
use crate::source::WaveformSource;
use crate::waveform::Waveform;

#[derive(Deserialize)]
struct TraceFile {
    signals: HashMap<String, TraceSignal>,
}

#[derive(Deserialize)]
struct TraceSignal {
    time: Vec<u64>,
    value: Vec<f64>,
}

pub struct JsonTraceSource {
    signals: HashMap<String, Waveform>,
    closed: bool,
}

impl JsonTraceSource {
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path).map_err(|e| {
            EngineError::source(format!("failed to open {}: {e}", path.display()))
        })?;
        let trace: TraceFile = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            EngineError::source(format!("failed to parse {}: {e}", path.display()))
        })?;

        let mut signals = HashMap::with_capacity(trace.signals.len());
        for (name, sig) in trace.signals {
            let wave = Waveform::new(sig.time, sig.value).map_err(|e| {
                EngineError::source(format!("signal {name} in {}: {e}", path.display()))
            })?;
            signals.insert(name, wave);
        }

        log::debug!(
            "Opened JSON trace {} with {} signals",
            path.display(),
            signals.len()
        );
        Ok(Self {
            signals,
            closed: false,
        })
    }

    /// Timestamps of the clock's rising edges (transitions to non-zero).
    fn clock_edges(&self, clock: &str) -> Result<Vec<u64>, EngineError> {
        let wave = self
            .signals
            .get(clock)
            .ok_or_else(|| EngineError::source(format!("clock signal not found: {clock}")))?;
        let mut edges = Vec::new();
        let mut prev = 0.0;
        for (&t, &v) in wave.times().iter().zip(wave.values().iter()) {
            if v != 0.0 && prev == 0.0 {
                edges.push(t);
            }
            prev = v;
        }
        Ok(edges)
    }
}

impl WaveformSource for JsonTraceSource {
    fn load_wave(&mut self, signal_path: &str, clock: Option<&str>) -> Result<Waveform, EngineError> {
        if self.closed {
            return Err(EngineError::source("trace source is closed"));
        }
        let wave = self
            .signals
            .get(signal_path)
            .cloned()
            .ok_or_else(|| EngineError::source(format!("signal not found: {signal_path}")))?;
        match clock {
            None => Ok(wave),
            Some(clock) => {
                let edges = self.clock_edges(clock)?;
                zero_order_hold(&wave, &edges)
            }
        }
    }

    fn signal_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.signals.keys().cloned().collect();
        names.sort();
        names
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
