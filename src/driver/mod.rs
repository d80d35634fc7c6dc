//! VMAX Driver Module
//!
//! Resolver, lifecycle manager and attachment orchestrator, composed by
//! [`VmaxDriver`], plus the [`DriverRegistry`] the composition root fills.

pub mod attach;
pub mod lifecycle;
pub mod resolver;
pub mod vmax;

pub use attach::*;
pub use lifecycle::*;
pub use resolver::*;
pub use vmax::*;

use crate::array::{InMemoryArray, UnisphereClient};
use crate::config::{ConfigStore, DriverConfig, KEY_ENDPOINT};
use crate::domain::ports::StorageDriverRef;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Name the driver registers under
pub const DRIVER_NAME: &str = "vmax";

/// Builds a driver from configuration
pub type DriverConstructor = Arc<dyn Fn(&ConfigStore) -> Result<StorageDriverRef> + Send + Sync>;

/// Name -> constructor map
#[derive(Default, Clone)]
pub struct DriverRegistry {
    constructors: BTreeMap<String, DriverConstructor>,
}

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any previous one of the same name
    pub fn register(&mut self, name: &str, constructor: DriverConstructor) -> &mut Self {
        info!("Registering storage driver: {}", name);
        self.constructors.insert(name.to_lowercase(), constructor);
        self
    }

    /// Construct a driver by name
    pub fn create(&self, name: &str, store: &ConfigStore) -> Result<StorageDriverRef> {
        let constructor = self
            .constructors
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::not_found("StorageDriver", name))?;
        constructor(store)
    }

    /// Registered driver names
    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}

/// Constructor for a driver talking to Unisphere
pub fn unisphere_constructor() -> DriverConstructor {
    Arc::new(|store: &ConfigStore| -> Result<StorageDriverRef> {
        let config = DriverConfig::from_store(store)?;
        let client = Arc::new(UnisphereClient::new(&config)?);
        Ok(Arc::new(VmaxDriver::new(config, client)) as StorageDriverRef)
    })
}

/// Constructor for a driver backed by a fresh in-memory array
pub fn standalone_constructor() -> DriverConstructor {
    Arc::new(|store: &ConfigStore| -> Result<StorageDriverRef> {
        let mut store = store.clone();
        if store.get_string(KEY_ENDPOINT).is_none() {
            store.set(KEY_ENDPOINT, "https://localhost");
        }
        let config = DriverConfig::from_store(&store)?;

        let mut array = InMemoryArray::new(config.symmetrix_id.clone());
        if let Some(port_group) = &config.port_group {
            array = array.with_port_group(port_group.clone());
        }
        Ok(Arc::new(VmaxDriver::new(config, Arc::new(array))) as StorageDriverRef)
    })
}
