//! Driver registry
//!
//! Drivers are registered as factories keyed by type identifier and loaded on
//! first use. A loaded driver stays cached until it is explicitly reloaded.

use compass_core::{config::DriversConfig, CompassError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::driver::{Driver, DriverError};
use crate::prometheus::{PrometheusDriver, PROMETHEUS_KIND};

/// Builds a driver instance
pub type DriverFactory =
    Arc<dyn Fn() -> std::result::Result<Arc<dyn Driver>, DriverError> + Send + Sync>;

/// Locates drivers by type identifier
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
    loaded: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in drivers registered
    pub fn with_builtin(config: &DriversConfig) -> Self {
        let mut registry = Self::new();
        let timeout = config.request_timeout();
        registry.register(PROMETHEUS_KIND, move || {
            Ok(Arc::new(PrometheusDriver::new(timeout)?) as Arc<dyn Driver>)
        });
        registry
    }

    /// Register a factory; replaces any factory for the same type
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn() -> std::result::Result<Arc<dyn Driver>, DriverError> + Send + Sync + 'static,
    {
        let kind = kind.into();
        debug!("Registered driver factory for {}", kind);
        self.factories.insert(kind, Arc::new(factory));
    }

    /// Register an already constructed driver under its own type identifier
    pub fn register_driver(&mut self, driver: Arc<dyn Driver>) {
        let kind = driver.kind().to_string();
        self.register(kind, move || Ok(Arc::clone(&driver)));
    }

    /// Registered type identifiers, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Driver for `kind`, loading it on first use
    pub async fn resolve(&self, kind: &str) -> Result<Arc<dyn Driver>> {
        if let Some(driver) = self.loaded.read().await.get(kind) {
            return Ok(Arc::clone(driver));
        }

        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| CompassError::DriverNotFound(kind.to_string()))?;

        let mut loaded = self.loaded.write().await;
        // Another task may have loaded it while we waited for the write lock
        if let Some(driver) = loaded.get(kind) {
            return Ok(Arc::clone(driver));
        }

        let driver = factory()
            .map_err(|e| CompassError::Config(format!("failed to load driver {}: {}", kind, e)))?;
        info!("Loaded driver {}", kind);
        loaded.insert(kind.to_string(), Arc::clone(&driver));
        Ok(driver)
    }

    /// Evict the cached driver for `kind`; returns whether one was loaded
    pub async fn reload(&self, kind: &str) -> bool {
        let evicted = self.loaded.write().await.remove(kind).is_some();
        if evicted {
            info!("Evicted driver {}", kind);
        }
        evicted
    }

    /// Evict every cached driver
    pub async fn reload_all(&self) {
        let mut loaded = self.loaded.write().await;
        info!("Evicting {} loaded drivers", loaded.len());
        loaded.clear();
    }

    /// Number of drivers currently loaded
    pub async fn loaded_count(&self) -> usize {
        self.loaded.read().await.len()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("kinds", &self.kinds())
            .finish_non_exhaustive()
    }
}
