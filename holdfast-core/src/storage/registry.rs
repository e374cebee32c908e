use super::StorageBackend;
use crate::error::{HoldError, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub type BackendConstructor = Box<dyn Fn() -> Result<Arc<dyn StorageBackend>> + Send + Sync>;

/// Maps configured backend names to constructors and owns the single live
/// backend instance for the process run.
///
/// Lifecycle: register every backend at startup, then `select` the
/// configured one before any load/persist call. Selection constructs
/// lazily and is idempotent, so re-entrant bootstrap code never ends up
/// with two live instances.
#[derive(Default)]
pub struct StorageRegistry {
    constructors: HashMap<String, BackendConstructor>,
    active: Option<Arc<dyn StorageBackend>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named backend constructor. Last registration under a
    /// name wins, so a host can override a built-in backend.
    pub fn register(&mut self, name: impl Into<String>, constructor: BackendConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// Selects the active backend, constructing it on first call. Once a
    /// backend is live, the same instance is returned.
    pub fn select(&mut self, name: &str) -> Result<Arc<dyn StorageBackend>> {
        if let Some(active) = &self.active {
            return Ok(Arc::clone(active));
        }

        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| HoldError::UnknownBackend(name.to_string()))?;

        let backend = constructor()?;
        tracing::info!("Selected {} storage backend", backend.name());
        self.active = Some(Arc::clone(&backend));
        Ok(backend)
    }

    pub fn active(&self) -> Option<Arc<dyn StorageBackend>> {
        self.active.clone()
    }
}
