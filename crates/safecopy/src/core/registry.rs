//! Driver registries for explicit dependency injection.
//!
//! A [`Registry`] maps connection strings to driver factories. Registries are
//! plain values built at process start and passed by reference; nothing is
//! registered globally. Drivers are consulted in registration order and the
//! first one accepting a DSN wins.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ConnOpts;
use crate::dsn::{self, Dsn};
use crate::error::{CopyError, Result};

use super::traits::{Dumper, Reader};

/// Anything that can tell whether it handles a DSN.
pub trait Driver: Send + Sync {
    fn is_supported(&self, dsn: &Dsn) -> bool;
}

/// Factory for source readers.
#[async_trait]
pub trait ReaderDriver: Driver {
    async fn connect(&self, opts: &ConnOpts) -> Result<Arc<dyn Reader>>;
}

/// Factory for destination dumpers.
///
/// The dumper pulls rows from `reader`, copying up to `concurrency` tables at
/// once.
#[async_trait]
pub trait DumperDriver: Driver {
    async fn connect(
        &self,
        opts: &ConnOpts,
        reader: Arc<dyn Reader>,
        concurrency: usize,
    ) -> Result<Box<dyn Dumper>>;
}

/// Append-only list of named drivers.
pub struct Registry<D: ?Sized> {
    drivers: Vec<(String, Arc<D>)>,
}

impl<D: ?Sized> Default for Registry<D> {
    fn default() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }
}

impl<D: Driver + ?Sized> Registry<D> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under `name`.
    ///
    /// # Panics
    ///
    /// Panics if a driver with the same name is already registered. Driver
    /// names are fixed at build time, so a duplicate is a programming error.
    pub fn register(&mut self, name: impl Into<String>, driver: Arc<D>) {
        let name = name.into();
        if self.has_driver(&name) {
            panic!("driver '{}' is already registered", name);
        }
        self.drivers.push((name, driver));
    }

    /// Check if a driver is registered.
    pub fn has_driver(&self, name: &str) -> bool {
        self.drivers.iter().any(|(n, _)| n == name)
    }

    /// Registered driver names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.drivers.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Find the first driver that accepts `dsn`.
    pub fn resolve(&self, dsn: &Dsn) -> Result<(&str, Arc<D>)> {
        self.drivers
            .iter()
            .find(|(_, driver)| driver.is_supported(dsn))
            .map(|(name, driver)| (name.as_str(), driver.clone()))
            .ok_or_else(|| CopyError::NoSupportedDriver(dsn::redact(&dsn.to_string())))
    }
}

impl Registry<dyn ReaderDriver> {
    /// Registry holding the built-in source drivers.
    pub fn with_builtins() -> Self {
        use crate::drivers::{MysqlDriver, PostgresDriver};

        let mut registry = Self::new();
        registry.register("postgres", Arc::new(PostgresDriver));
        registry.register("mysql", Arc::new(MysqlDriver));
        registry
    }

    /// Parse the DSN, pick a driver and open a reader.
    pub async fn connect(&self, opts: &ConnOpts) -> Result<Arc<dyn Reader>> {
        let dsn = Dsn::parse(&opts.dsn)?;
        let (name, driver) = self.resolve(&dsn)?;
        debug!("Using reader driver {}", name);
        driver.connect(opts).await
    }
}

impl Registry<dyn DumperDriver> {
    /// Registry holding the built-in destination drivers.
    pub fn with_builtins() -> Self {
        use crate::drivers::{MysqlDriver, PostgresDriver, QueryDriver};

        let mut registry = Self::new();
        registry.register("postgres", Arc::new(PostgresDriver));
        registry.register("mysql", Arc::new(MysqlDriver));
        registry.register("query", Arc::new(QueryDriver));
        registry
    }

    /// Parse the DSN, pick a driver and open a dumper fed by `reader`.
    pub async fn connect(
        &self,
        opts: &ConnOpts,
        reader: Arc<dyn Reader>,
        concurrency: usize,
    ) -> Result<Box<dyn Dumper>> {
        let dsn = Dsn::parse(&opts.dsn)?;
        let (name, driver) = self.resolve(&dsn)?;
        debug!("Using dumper driver {}", name);
        driver.connect(opts, reader, concurrency).await
    }
}

impl<D: ?Sized> fmt::Debug for Registry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field(
                "drivers",
                &self.drivers.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}
