//! Bounded cache of analysis engines, keyed by trace-file path.
//!
//! Each cached engine keeps its trace open, so the cache bound is also the
//! bound on concurrently open reader handles. Eviction is FIFO by insertion
//! order: the oldest-opened engine is closed before a new one is inserted.
//! Lookups never evict.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::engine::AnalysisEngine;
use crate::error::EngineError;
use crate::source::SourceRegistry;

pub const DEFAULT_CAPACITY: usize = 16;

/// Shared handle to one engine. The mutex serializes analysis calls against
/// the same trace; engines for different traces run fully in parallel.
pub type SharedEngine = Arc<Mutex<AnalysisEngine>>;

pub struct EngineRegistry {
    sources: SourceRegistry,
    capacity: usize,
    /// Insertion-ordered; front is the oldest entry.
    engines: VecDeque<(PathBuf, SharedEngine)>,
}

impl EngineRegistry {
    pub fn new(sources: SourceRegistry) -> Self {
        Self::with_capacity(sources, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(sources: SourceRegistry, capacity: usize) -> Self {
        Self {
            sources,
            capacity: capacity.max(1),
            engines: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Return the cached engine for a trace, or open a new one.
    ///
    /// Construction happens before any eviction: a failed open inserts
    /// nothing and evicts nothing. At capacity this briefly holds one extra
    /// reader handle while the new engine opens, before the oldest-inserted
    /// engine is closed.
    pub fn get_or_create(&mut self, file_path: &Path) -> Result<SharedEngine, EngineError> {
        if let Some((_, engine)) = self.engines.iter().find(|(p, _)| p == file_path) {
            return Ok(engine.clone());
        }

        let engine = AnalysisEngine::open(&self.sources, file_path)?;

        if self.engines.len() >= self.capacity {
            if let Some((old_path, old_engine)) = self.engines.pop_front() {
                log::info!(
                    "Engine cache full ({}), evicting {}",
                    self.capacity,
                    old_path.display()
                );
                old_engine
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .close();
            }
        }

        let shared: SharedEngine = Arc::new(Mutex::new(engine));
        self.engines.push_back((file_path.to_path_buf(), shared.clone()));
        Ok(shared)
    }

    /// Close every cached engine and drain the registry.
    pub fn shutdown(&mut self) {
        for (path, engine) in self.engines.drain(..) {
            log::debug!("Shutting down engine for {}", path.display());
            engine.lock().unwrap_or_else(|p| p.into_inner()).close();
        }
    }
}

impl Drop for EngineRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
