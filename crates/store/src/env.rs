//! Environment: registration, load, and close
//!
//! Stores are registered against an environment before a single `load()`
//! call opens the engine and initializes every store and its indexes in
//! registration order. The registered set is closed at load time: no store
//! may be added afterwards. Duplicate partition names fail the load before
//! any partition is opened.

use crate::error::{Result, StoreError};
use burrow_engine::{Engine, EngineConfig, Transaction};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};

/// Registration hooks each store exposes to its environment
pub(crate) trait StoreRegistration: Send + Sync {
    fn name(&self) -> &str;
    fn index_names(&self) -> Vec<String>;
    fn init(&self, engine: &Engine) -> Result<()>;
    /// Close indexes then the primary, collecting rather than short-
    /// circuiting on failures
    fn close_all(&self) -> Vec<StoreError>;
}

struct EnvInner {
    config: EngineConfig,
    stores: RwLock<Vec<Arc<dyn StoreRegistration>>>,
    engine: RwLock<Option<Engine>>,
}

/// Process-wide handle to one engine instance and its registered stores.
///
/// Cloning is cheap; every clone refers to the same environment.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl Environment {
    /// Create an environment. Nothing is opened until [`load`](Self::load).
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                config,
                stores: RwLock::new(Vec::new()),
                engine: RwLock::new(None),
            }),
        }
    }

    /// Register a store. The registered set is closed once
    /// [`load`](Self::load) runs.
    pub fn register<K, V>(&self, store: Arc<crate::store::Store<K, V>>) -> Result<()>
    where
        K: std::fmt::Debug + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        self.register_store(store)
    }

    pub(crate) fn register_store(&self, store: Arc<dyn StoreRegistration>) -> Result<()> {
        if self.is_loaded() {
            return Err(StoreError::Config(format!(
                "cannot register store '{}' after the environment has loaded",
                store.name()
            )));
        }
        self.inner.stores.write().push(store);
        Ok(())
    }

    /// Open the engine and initialize every registered store and index,
    /// in registration order, exactly once.
    ///
    /// Fails with [`StoreError::Config`] before any partition is opened if
    /// two registered stores or indexes share a name.
    pub fn load(&self) -> Result<()> {
        let mut engine_slot = self.inner.engine.write();
        if engine_slot.is_some() {
            return Err(StoreError::Config(
                "environment is already loaded".to_string(),
            ));
        }
        let stores: Vec<Arc<dyn StoreRegistration>> = self.inner.stores.read().clone();

        // Duplicate names are usually copy+paste mistakes; catch them all
        // before touching the engine.
        let mut names = BTreeSet::new();
        for store in &stores {
            let all = std::iter::once(store.name().to_string()).chain(store.index_names());
            for name in all {
                if !names.insert(name.clone()) {
                    return Err(StoreError::Config(format!(
                        "two partitions share the name \"{name}\""
                    )));
                }
            }
        }

        let engine = Engine::open(self.inner.config.clone())
            .map_err(|e| StoreError::engine("environment.open", e))?;
        for store in &stores {
            store.init(&engine)?;
        }
        debug!(stores = stores.len(), "environment loaded");
        *engine_slot = Some(engine);
        Ok(())
    }

    /// Whether [`load`](Self::load) has completed
    pub fn is_loaded(&self) -> bool {
        self.inner.engine.read().is_some()
    }

    pub(crate) fn engine(&self) -> Result<Engine> {
        self.inner.engine.read().clone().ok_or_else(|| {
            StoreError::Config("environment is not loaded; call load() first".to_string())
        })
    }

    /// Begin a transaction against the engine
    pub fn begin(&self) -> Result<Transaction> {
        self.engine()?
            .begin()
            .map_err(|e| StoreError::engine("environment.begin", e))
    }

    /// Close every store's indexes, then the store, then the engine.
    ///
    /// Cleanup is best-effort across all resources; failures are logged,
    /// counted, and reported in aggregate.
    pub fn close(&self) -> Result<()> {
        let engine = self.inner.engine.write().take().ok_or_else(|| {
            StoreError::Config("environment is not loaded; nothing to close".to_string())
        })?;

        let mut failures = 0usize;
        for store in self.inner.stores.read().iter() {
            for err in store.close_all() {
                error!(store = store.name(), %err, "failed to close store resource");
                failures += 1;
            }
        }
        if let Err(err) = engine.close() {
            error!(%err, "failed to close engine");
            failures += 1;
        }

        if failures > 0 {
            Err(StoreError::CloseFailed { failures })
        } else {
            Ok(())
        }
    }

    /// Whether two handles refer to the same environment
    pub(crate) fn same(a: &Environment, b: &Environment) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_before_load_is_a_configuration_error() {
        let env = Environment::new(EngineConfig::default());
        assert!(matches!(env.begin(), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_close_before_load_is_a_configuration_error() {
        let env = Environment::new(EngineConfig::default());
        assert!(matches!(env.close(), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_load_twice_is_rejected() {
        let env = Environment::new(EngineConfig::default());
        env.load().unwrap();
        assert!(matches!(env.load(), Err(StoreError::Config(_))));
    }
}
