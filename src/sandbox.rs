//! Sandboxed script execution.
//!
//! Analyst scripts run in a restricted rhai engine: hard limits on
//! operations, recursion, and container sizes, and a fixed whitelist of
//! injected bindings (the Waveform API plus the `W`/`MW` loaders). No
//! filesystem, network, or process primitives are ever registered.
//!
//! The script's final expression is its result. Every failure is converted
//! into one [`ScriptDiagnostic`]; nothing panics or escapes uncontrolled.

use std::sync::Arc;

use rhai::{Dynamic, Engine, Scope};

use crate::script_diagnostics::{from_eval_error, from_parse_error, ScriptDiagnostic};
use crate::source::WaveformSource;
use crate::waveform_rhai::{register_waveform_api, HostContext};

pub struct ScriptSandbox {
    engine: Engine,
    host: Arc<HostContext>,
}

impl ScriptSandbox {
    /// Build a sandbox bound to one waveform source.
    pub fn new(source: Box<dyn WaveformSource>) -> Self {
        let host = Arc::new(HostContext::new(source));
        let mut engine = Engine::new();

        // Sandbox limits. The operations budget is sized for closure-based
        // filter/map, which re-enter the interpreter once per sample.
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(64);
        engine.set_max_operations(10_000_000);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(1_000);

        register_waveform_api(&mut engine, host.clone());

        Self { engine, host }
    }

    /// Execute a script and return its final expression value.
    ///
    /// Failures from the loader bindings keep their original reader message
    /// (recorded in the host-error channel) rather than rhai's generic
    /// function-call wrapper.
    pub fn eval(&self, script: &str) -> Result<Dynamic, ScriptDiagnostic> {
        // Discard any stale host error from a previous run.
        self.host.take_host_error();

        let ast = self
            .engine
            .compile(script)
            .map_err(|e| from_parse_error(&e))?;

        let mut scope = Scope::new();
        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| from_eval_error(&e, self.host.take_host_error()))
    }

    /// Shared loader state (signal cache, source handle).
    pub fn host(&self) -> &Arc<HostContext> {
        &self.host
    }

    /// Release the underlying source handle. Idempotent.
    pub fn close_source(&self) {
        self.host.close_source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::script_diagnostics::ScriptDiagnosticKind;
    use crate::waveform::Waveform;

    struct StubSource;

    impl WaveformSource for StubSource {
        fn load_wave(
            &mut self,
            signal_path: &str,
            _clock: Option<&str>,
        ) -> Result<Waveform, EngineError> {
            match signal_path {
                "top.count" => Waveform::new(vec![0, 1, 2, 3], vec![0.0, 1.0, 2.0, 3.0]),
                other => Err(EngineError::source(format!("signal not found: {other}"))),
            }
        }

        fn signal_names(&self) -> Vec<String> {
            vec!["top.count".to_string()]
        }

        fn close(&mut self) {}
    }

    fn sandbox() -> ScriptSandbox {
        ScriptSandbox::new(Box::new(StubSource))
    }

    #[test]
    fn test_final_expression_is_result() {
        let sb = sandbox();
        let result = sb.eval("let w = W(\"top.count\"); w.scale(2.0)").unwrap();
        let wave = result.try_cast::<Waveform>().unwrap();
        assert_eq!(wave.values(), &[0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_closure_filter_and_map() {
        let sb = sandbox();
        let result = sb
            .eval("W(\"top.count\").filter(|v| v > 1.0).map(|v| v * 10.0)")
            .unwrap();
        let wave = result.try_cast::<Waveform>().unwrap();
        assert_eq!(wave.times(), &[2, 3]);
        assert_eq!(wave.values(), &[20.0, 30.0]);
    }

    #[test]
    fn test_parse_error_reports_location() {
        let sb = sandbox();
        let err = sb.eval("let x = ;").unwrap_err();
        assert_eq!(err.kind, ScriptDiagnosticKind::ParseError);
        assert!(err.location.is_some());
    }

    #[test]
    fn test_unknown_identifier_is_api_misuse() {
        let sb = sandbox();
        let err = sb.eval("frobnicate(1)").unwrap_err();
        assert_eq!(err.kind, ScriptDiagnosticKind::HostApiMisuse);
    }

    #[test]
    fn test_reader_failure_keeps_original_message() {
        let sb = sandbox();
        let err = sb.eval("W(\"top.missing\")").unwrap_err();
        assert_eq!(err.kind, ScriptDiagnosticKind::HostError);
        assert!(
            err.message.contains("signal not found: top.missing"),
            "diagnostic lost the reader detail: {}",
            err.message
        );
        assert!(err.message.contains("W(\"top.missing\")"));
    }

    #[test]
    fn test_runaway_script_is_bounded() {
        let sb = sandbox();
        let err = sb.eval("let i = 0; loop { i += 1; }").unwrap_err();
        assert_eq!(err.kind, ScriptDiagnosticKind::RuntimeError);
    }

    #[test]
    fn test_mw_returns_named_map() {
        let sb = sandbox();
        let result = sb.eval("MW(\"top\\\\..*\")").unwrap();
        let map = result.try_cast::<rhai::Map>().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("top.count"));
    }
}
