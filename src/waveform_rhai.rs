//! Rhai integration for the Waveform API.
//!
//! Registers the `Waveform` type, its transform methods, and the two signal
//! loader bindings with a rhai engine:
//!
//! - `W(signal_path)` / `W(signal_path, clock)` loads one waveform.
//! - `MW(pattern)` / `MW(pattern, clock)` takes a regex pattern over the trace's
//!   signal namespace, returning a map of matched name to waveform.
//!
//! Both loaders memoize per engine: repeated calls with identical arguments
//! return the cached waveform instead of re-invoking the reader. When a
//! loader fails inside the reader, the original failure is recorded in the
//! host-error channel so the surfaced diagnostic keeps its full detail.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, NativeCallContext, Position};

use crate::error::EngineError;
use crate::script_diagnostics::HostErrorDetail;
use crate::source::WaveformSource;
use crate::waveform::{SampleReducer, Waveform};

/// Memoization key for loader bindings: signal path or pattern, plus clock.
type LoadKey = (String, Option<String>);

/// State shared between the engine and the loader bindings.
pub struct HostContext {
    source: Mutex<Box<dyn WaveformSource>>,
    cache: Mutex<HashMap<LoadKey, Waveform>>,
    last_host_error: Mutex<Option<HostErrorDetail>>,
}

impl HostContext {
    pub fn new(source: Box<dyn WaveformSource>) -> Self {
        Self {
            source: Mutex::new(source),
            cache: Mutex::new(HashMap::new()),
            last_host_error: Mutex::new(None),
        }
    }

    /// Take the most recent loader failure, clearing the channel.
    pub fn take_host_error(&self) -> Option<HostErrorDetail> {
        self.last_host_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }

    /// Release the underlying reader. Idempotent (delegates to the source).
    pub fn close_source(&self) {
        self.source
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .close();
    }

    /// Signal namespace of the underlying trace.
    pub fn signal_names(&self) -> Vec<String> {
        self.source
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .signal_names()
    }

    fn record_host_error(&self, call: String, err: &EngineError) -> Box<EvalAltResult> {
        let message = err.to_string();
        log::warn!("loader binding failed: {call}: {message}");
        *self
            .last_host_error
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(HostErrorDetail {
            call: call.clone(),
            message: message.clone(),
        });
        Box::new(EvalAltResult::ErrorRuntime(
            format!("{call}: {message}").into(),
            Position::NONE,
        ))
    }

    /// Load one waveform through the memoization cache.
    fn load_single(
        &self,
        signal_path: &str,
        clock: Option<&str>,
    ) -> Result<Waveform, Box<EvalAltResult>> {
        let key: LoadKey = (signal_path.to_string(), clock.map(str::to_string));
        if let Some(cached) = self
            .cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&key)
        {
            return Ok(cached.clone());
        }

        let loaded = self
            .source
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .load_wave(signal_path, clock);
        match loaded {
            Ok(wave) => {
                self.cache
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(key, wave.clone());
                Ok(wave)
            }
            Err(err) => {
                let call = match clock {
                    Some(c) => format!("W({signal_path:?}, {c:?})"),
                    None => format!("W({signal_path:?})"),
                };
                Err(self.record_host_error(call, &err))
            }
        }
    }

    /// Resolve a pattern against the signal namespace and load every match.
    fn load_matching(
        &self,
        pattern: &str,
        clock: Option<&str>,
    ) -> Result<rhai::Map, Box<EvalAltResult>> {
        let call = match clock {
            Some(c) => format!("MW({pattern:?}, {c:?})"),
            None => format!("MW({pattern:?})"),
        };
        let regex = regex::Regex::new(pattern).map_err(|e| {
            self.record_host_error(call.clone(), &EngineError::source(format!("bad pattern: {e}")))
        })?;

        let names: Vec<String> = self
            .signal_names()
            .into_iter()
            .filter(|n| regex.is_match(n))
            .collect();
        if names.is_empty() {
            return Err(self.record_host_error(
                call,
                &EngineError::source("pattern matched no signals"),
            ));
        }

        let mut map = rhai::Map::new();
        for name in names {
            let wave = self.load_single(&name, clock)?;
            map.insert(name.into(), Dynamic::from(wave));
        }
        Ok(map)
    }
}

/// Coerce a rhai value (float or int) to f64.
fn to_float(value: &Dynamic) -> Result<f64, Box<EvalAltResult>> {
    if let Ok(f) = value.as_float() {
        return Ok(f);
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as f64);
    }
    Err(format!("expected a number, got {}", value.type_name()).into())
}

fn engine_err(err: EngineError) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        err.to_string().into(),
        Position::NONE,
    ))
}

/// Register the Waveform type, its methods, and the loader bindings.
pub fn register_waveform_api(engine: &mut Engine, host: Arc<HostContext>) {
    engine.register_type_with_name::<Waveform>("Waveform");

    // === Loader bindings (memoizing) ===
    let ctx = host.clone();
    engine.register_fn(
        "W",
        move |path: ImmutableString| -> Result<Waveform, Box<EvalAltResult>> {
            ctx.load_single(path.as_str(), None)
        },
    );
    let ctx = host.clone();
    engine.register_fn(
        "W",
        move |path: ImmutableString,
              clock: ImmutableString|
              -> Result<Waveform, Box<EvalAltResult>> {
            ctx.load_single(path.as_str(), Some(clock.as_str()))
        },
    );
    let ctx = host.clone();
    engine.register_fn(
        "MW",
        move |pattern: ImmutableString| -> Result<rhai::Map, Box<EvalAltResult>> {
            ctx.load_matching(pattern.as_str(), None)
        },
    );
    let ctx = host;
    engine.register_fn(
        "MW",
        move |pattern: ImmutableString,
              clock: ImmutableString|
              -> Result<rhai::Map, Box<EvalAltResult>> {
            ctx.load_matching(pattern.as_str(), Some(clock.as_str()))
        },
    );

    // === Block sampling ===
    engine.register_fn("sample", |w: &mut Waveform, rate: i64| {
        w.sample(rate.max(1) as usize, SampleReducer::Mean)
    });
    engine.register_fn(
        "sample",
        |w: &mut Waveform,
         rate: i64,
         reducer: ImmutableString|
         -> Result<Waveform, Box<EvalAltResult>> {
            let reducer = SampleReducer::parse(reducer.as_str()).ok_or_else(|| {
                format!(
                    "unknown sample reducer {:?} (expected mean/min/max/sum/first/last)",
                    reducer.as_str()
                )
            })?;
            Ok(w.sample(rate.max(1) as usize, reducer))
        },
    );

    // === Per-sample transforms (script closures) ===
    engine.register_fn(
        "filter",
        |ctx: NativeCallContext,
         w: &mut Waveform,
         predicate: FnPtr|
         -> Result<Waveform, Box<EvalAltResult>> {
            let mut time = Vec::new();
            let mut value = Vec::new();
            for (&t, &v) in w.times().iter().zip(w.values().iter()) {
                let out: Dynamic = predicate.call_within_context(&ctx, (v,))?;
                let keep = out
                    .as_bool()
                    .map_err(|ty| format!("filter predicate must return a bool, got {ty}"))?;
                if keep {
                    time.push(t);
                    value.push(v);
                }
            }
            Waveform::new(time, value).map_err(engine_err)
        },
    );
    engine.register_fn(
        "map",
        |ctx: NativeCallContext,
         w: &mut Waveform,
         f: FnPtr|
         -> Result<Waveform, Box<EvalAltResult>> {
            let mut value = Vec::with_capacity(w.len());
            for &v in w.values() {
                let out: Dynamic = f.call_within_context(&ctx, (v,))?;
                value.push(to_float(&out)?);
            }
            Waveform::new(w.times().to_vec(), value).map_err(engine_err)
        },
    );

    // Common event predicate, avoids a closure for the usual case.
    engine.register_fn("nonzero", |w: &mut Waveform| w.filter(|v| v != 0.0));

    // === Compression ===
    engine.register_fn("compress", |w: &mut Waveform| w.compress());

    // === Element-wise arithmetic (grid-aligned waveforms) ===
    engine.register_fn(
        "add",
        |a: &mut Waveform, b: Waveform| -> Result<Waveform, Box<EvalAltResult>> {
            a.zip_with(&b, |x, y| x + y).map_err(engine_err)
        },
    );
    engine.register_fn(
        "sub",
        |a: &mut Waveform, b: Waveform| -> Result<Waveform, Box<EvalAltResult>> {
            a.zip_with(&b, |x, y| x - y).map_err(engine_err)
        },
    );
    engine.register_fn(
        "mul",
        |a: &mut Waveform, b: Waveform| -> Result<Waveform, Box<EvalAltResult>> {
            a.zip_with(&b, |x, y| x * y).map_err(engine_err)
        },
    );
    engine.register_fn(
        "div",
        |a: &mut Waveform, b: Waveform| -> Result<Waveform, Box<EvalAltResult>> {
            a.zip_with(&b, |x, y| x / y).map_err(engine_err)
        },
    );

    // === Scalar arithmetic ===
    engine.register_fn(
        "scale",
        |w: &mut Waveform, factor: Dynamic| -> Result<Waveform, Box<EvalAltResult>> {
            let factor = to_float(&factor)?;
            Ok(w.map(|v| v * factor))
        },
    );
    engine.register_fn(
        "offset",
        |w: &mut Waveform, amount: Dynamic| -> Result<Waveform, Box<EvalAltResult>> {
            let amount = to_float(&amount)?;
            Ok(w.map(|v| v + amount))
        },
    );

    // === Statistics ===
    engine.register_fn("len", |w: &mut Waveform| w.len() as i64);
    engine.register_fn("is_empty", |w: &mut Waveform| w.is_empty());
    engine.register_fn("mean", |w: &mut Waveform| w.mean());
    engine.register_fn("min", |w: &mut Waveform| w.min());
    engine.register_fn("max", |w: &mut Waveform| w.max());
    engine.register_fn("sum", |w: &mut Waveform| w.sum());
    engine.register_fn(
        "first_time",
        |w: &mut Waveform| -> Result<i64, Box<EvalAltResult>> {
            w.first_time()
                .map(|t| t as i64)
                .ok_or_else(|| "first_time on an empty waveform".into())
        },
    );
    engine.register_fn(
        "last_time",
        |w: &mut Waveform| -> Result<i64, Box<EvalAltResult>> {
            w.last_time()
                .map(|t| t as i64)
                .ok_or_else(|| "last_time on an empty waveform".into())
        },
    );
}
