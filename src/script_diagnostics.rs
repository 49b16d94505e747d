//! Structured script diagnostics.
//!
//! Rhai provides rich error types (parse + runtime) with positions. Wavescope
//! wraps those into a stable, JSON-serializable diagnostic format that a
//! frontend can surface without access to Rust logs.
//!
//! When a loader binding (`W`/`MW`) fails inside the reader, the sandbox
//! records the original failure out of band; that detail takes priority over
//! rhai's generic wrapper message when the diagnostic is assembled.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax/parse errors (compile time).
    ParseError,
    /// Runtime errors in user code.
    RuntimeError,
    /// Script used the injected API incorrectly (unknown identifier, wrong types).
    HostApiMisuse,
    /// A host binding failed (e.g. the waveform reader raised during `W`).
    HostError,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based line number in the user script.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

/// Detail captured when a loader binding fails during script execution.
///
/// Carries the originating call and the reader's original message so the
/// surfaced error is never a bare "function call failed".
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HostErrorDetail {
    /// The binding invocation that failed, e.g. `W("top.valid")`.
    pub call: String,
    /// The original error text from the reader or registry.
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub message: String,
    pub location: Option<ScriptLocation>,
    /// Raw engine error string (useful for bug reports).
    pub raw: Option<String>,
}

impl std::fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} (line {}, column {})", self.message, loc.line, loc.column),
            None => write!(f, "{}", self.message),
        }
    }
}

fn classify_message(message: &str) -> ScriptDiagnosticKind {
    // Rhai error strings are fairly stable; this provides a pragmatic
    // classification without depending on Rhai's internal enum variants.
    let lower = message.to_ascii_lowercase();

    if lower.contains("property not found")
        || lower.contains("variable not found")
        || lower.contains("function not found")
        || lower.contains("array index")
        || lower.contains("map key")
        || lower.contains("mismatched types")
        || lower.contains("invalid")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }

    ScriptDiagnosticKind::RuntimeError
}

fn location_of(pos: rhai::Position) -> Option<ScriptLocation> {
    let line = pos.line()? as u32;
    let column = pos.position().unwrap_or(1) as u32;
    Some(ScriptLocation {
        line,
        column: column.max(1),
    })
}

pub fn from_parse_error(err: &rhai::ParseError) -> ScriptDiagnostic {
    let raw = err.to_string();
    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::ParseError,
        message: raw.clone(),
        location: location_of(err.position()),
        raw: Some(raw),
    }
}

/// Build a diagnostic from an evaluation error, preferring the captured host
/// detail over rhai's generic wrapper text when a binding failed.
pub fn from_eval_error(
    err: &rhai::EvalAltResult,
    host_detail: Option<HostErrorDetail>,
) -> ScriptDiagnostic {
    let raw = err.to_string();
    match host_detail {
        Some(detail) => ScriptDiagnostic {
            kind: ScriptDiagnosticKind::HostError,
            message: format!("{}: {}", detail.call, detail.message),
            location: location_of(err.position()),
            raw: Some(raw),
        },
        None => ScriptDiagnostic {
            kind: classify_message(&raw),
            message: raw.clone(),
            location: location_of(err.position()),
            raw: Some(raw),
        },
    }
}

/// Diagnostic for a script whose result value has the wrong type.
pub fn wrong_result_type(type_name: &str) -> ScriptDiagnostic {
    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::HostApiMisuse,
        message: format!(
            "script must return a waveform or a map of name to waveform, got {type_name}"
        ),
        location: None,
        raw: None,
    }
}
