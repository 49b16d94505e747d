//! Engine error taxonomy.
//!
//! Every failure crossing the engine boundary is one structured value:
//! a kind plus a human-readable message. Script failures carry the full
//! diagnostic from the sandbox so callers can render line/column and the
//! original host error text.

use thiserror::Error;

use crate::script_diagnostics::ScriptDiagnostic;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The trace file's suffix has no registered reader backend.
    #[error("unsupported waveform file type: {suffix}")]
    UnsupportedFileType { suffix: String },

    /// A reader backend exists for the suffix but is not available in this build.
    #[error("reader backend for {suffix} is not available: {message}")]
    BackendUnavailable { suffix: String, message: String },

    /// The script failed to parse or run. The engine stays open and usable.
    #[error("script error: {0}")]
    Script(ScriptDiagnostic),

    /// The transform produced a logically inconsistent shape
    /// (mismatched timestamp grids, non-waveform mapping value).
    #[error("data shape error: {message}")]
    DataShape { message: String },

    /// Analysis was requested on a closed engine.
    #[error("analysis engine is closed")]
    Closed,

    /// The waveform source failed outside script execution.
    #[error("waveform source error: {message}")]
    Source { message: String },
}

impl EngineError {
    pub fn data_shape(message: impl Into<String>) -> Self {
        Self::DataShape {
            message: message.into(),
        }
    }

    pub fn source(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
        }
    }
}
