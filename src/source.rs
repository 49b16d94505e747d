//! Waveform source boundary.
//!
//! The binary trace decoder is an external capability. The engine only
//! depends on this trait: resolve a signal path (optionally re-sampled onto
//! a named clock) to a [`Waveform`], enumerate the signal namespace, and
//! release the underlying handle exactly once.
//!
//! Backends are selected by file suffix through [`SourceRegistry`]; an
//! unrecognized suffix fails fast with a named error.

use std::collections::HashMap;
use std::path::Path;

use crate::error::EngineError;
use crate::json_source::JsonTraceSource;
use crate::waveform::Waveform;

/// A scoped, closable handle onto one opened trace file.
pub trait WaveformSource: Send {
    /// Load a single signal by exact path, optionally re-sampled onto the
    /// rising edges of the named clock signal.
    fn load_wave(&mut self, signal_path: &str, clock: Option<&str>) -> Result<Waveform, EngineError>;

    /// All signal paths available in this trace.
    fn signal_names(&self) -> Vec<String>;

    /// Release the underlying reader. Must be idempotent.
    fn close(&mut self);
}

impl std::fmt::Debug for dyn WaveformSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveformSource")
            .field("signals", &self.signal_names().len())
            .finish()
    }
}

/// Factory producing a source handle for one opened file.
pub type SourceFactory =
    Box<dyn Fn(&Path) -> Result<Box<dyn WaveformSource>, EngineError> + Send + Sync>;

/// Dispatches trace files to reader backends by file suffix.
pub struct SourceRegistry {
    factories: HashMap<String, SourceFactory>,
}

impl SourceRegistry {
    /// An empty registry with no backends.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in backends: the JSON reference format.
    /// Binary readers (VCD, FSDB) are registered by embedders.
    pub fn with_default_backends() -> Self {
        let mut registry = Self::new();
        registry.register("json", |path| {
            Ok(Box::new(JsonTraceSource::open(path)?) as Box<dyn WaveformSource>)
        });
        registry
    }

    /// Register a backend for a file suffix (without the leading dot).
    ///
    /// A factory whose reader is compiled out of the current build should
    /// return [`EngineError::BackendUnavailable`] rather than stay
    /// unregistered, so callers can tell a missing reader apart from an
    /// unknown file type.
    pub fn register<F>(&mut self, suffix: &str, factory: F)
    where
        F: Fn(&Path) -> Result<Box<dyn WaveformSource>, EngineError> + Send + Sync + 'static,
    {
        self.factories
            .insert(suffix.to_ascii_lowercase(), Box::new(factory));
    }

    /// Open a trace file with the backend registered for its suffix.
    pub fn open(&self, path: &Path) -> Result<Box<dyn WaveformSource>, EngineError> {
        let suffix = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "unknown".to_string());
        match self.factories.get(&suffix) {
            Some(factory) => factory(path),
            None => Err(EngineError::UnsupportedFileType { suffix }),
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_default_backends()
    }
}
