//! VMAX Storage Driver
//!
//! Volume driver for Dell EMC VMAX/Symmetrix arrays managed through the
//! Unisphere REST API. Volumes are created into a default storage group and
//! exposed to a host by moving them into that host's masking-view group.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         REST API (axum)                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                           VmaxDriver                             │
//! │  ┌────────────────┐  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │    Volume      │  │    Attachment    │  │     Resource     │  │
//! │  │   Lifecycle    │  │   Orchestrator   │  │     Resolver     │  │
//! │  └───────┬────────┘  └────────┬─────────┘  └────────┬─────────┘  │
//! │          └────────────────────┼─────────────────────┘            │
//! ├───────────────────────────────┴──────────────────────────────────┤
//! │                          ArrayClient                             │
//! │  ┌──────────────────────────┐  ┌──────────────────────────────┐  │
//! │  │  Unisphere (reqwest)     │  │  InMemory (standalone/tests) │  │
//! │  └──────────────────────────┘  └──────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//!
//!   Host side: VmaxExecutor (initiator name, /dev/disk/by-id scan)
//! ```
//!
//! # Modules
//!
//! - [`api`]: REST API and server
//! - [`array`]: Array client adapters
//! - [`config`]: Configuration store and driver configuration
//! - [`domain`]: Wire models and port traits
//! - [`driver`]: Storage driver and its components
//! - [`executor`]: Host-side identity and device discovery
//! - [`metrics`]: Prometheus operation metrics
//! - [`error`]: Error types and handling

pub mod api;
pub mod array;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod executor;
pub mod metrics;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use array::{InMemoryArray, UnisphereClient};

pub use config::{ConfigStore, DriverConfig};

pub use domain::ports::{
    ArrayClient, ArrayClientRef, Instance, InstanceId, LocalDevices, StorageDriver,
    StorageDriverRef, StorageExecutor, StorageExecutorRef, StorageType, Volume,
    VolumeAttachOpts, VolumeCreateOpts, VolumeDetachOpts,
};

pub use driver::{
    standalone_constructor, unisphere_constructor, AttachOutcome, AttachmentOrchestrator,
    DriverRegistry, ResourceResolver, VmaxDriver, VolumeLifecycle, DRIVER_NAME,
};

pub use error::{Error, ErrorKind, Result};

pub use executor::{ExecutorConfig, IdentityScheme, VmaxExecutor};

pub use metrics::{DriverMetrics, InstrumentedDriver};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
