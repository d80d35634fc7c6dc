//! Host-Side Executor
//!
//! Runs on the client host: reports the host's identity to the array and
//! maps attached volumes to local block devices.

pub mod devices;
pub mod initiator;

pub use devices::*;
pub use initiator::*;

use crate::domain::ports::{InstanceId, LocalDevices, StorageExecutor};
use crate::driver::DRIVER_NAME;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

// =============================================================================
// Constants
// =============================================================================

const INITIATOR_FILE: &str = "/etc/iscsi/initiatorname.iscsi";
const NET_CLASS_PATH: &str = "/sys/class/net";
const DISK_BY_ID_PATH: &str = "/dev/disk/by-id";
const DEFAULT_INTERFACE: &str = "eth0";

// =============================================================================
// Executor Configuration
// =============================================================================

/// How the host identifies itself to the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityScheme {
    /// iSCSI initiator name
    #[default]
    Iscsi,
    /// MAC address of a network interface
    Mac,
}

/// Configuration for the host-side executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub scheme: IdentityScheme,
    /// iSCSI initiator name file
    pub initiator_file: PathBuf,
    /// Path to /sys/class/net (for testing)
    pub net_class_path: PathBuf,
    /// Interface used by the MAC scheme
    pub interface: String,
    /// Path to /dev/disk/by-id (for testing)
    pub disk_by_id_path: PathBuf,
    /// Match device-mapper links instead of plain WWN links
    pub device_mapper: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            scheme: IdentityScheme::Iscsi,
            initiator_file: PathBuf::from(INITIATOR_FILE),
            net_class_path: PathBuf::from(NET_CLASS_PATH),
            interface: DEFAULT_INTERFACE.to_string(),
            disk_by_id_path: PathBuf::from(DISK_BY_ID_PATH),
            device_mapper: false,
        }
    }
}

impl ExecutorConfig {
    fn naming(&self) -> DeviceNaming {
        if self.device_mapper {
            DeviceNaming::DeviceMapper
        } else {
            DeviceNaming::Wwn
        }
    }
}

// =============================================================================
// VMAX Executor
// =============================================================================

pub struct VmaxExecutor {
    config: ExecutorConfig,
}

impl VmaxExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Create an executor reading the standard host paths
    pub fn default_executor() -> Self {
        Self::new(ExecutorConfig::default())
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

#[async_trait]
impl StorageExecutor for VmaxExecutor {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn instance_id(&self) -> Result<InstanceId> {
        let id = match self.config.scheme {
            IdentityScheme::Iscsi => read_initiator_name(&self.config.initiator_file)?,
            IdentityScheme::Mac => {
                read_mac_address(&self.config.net_class_path, &self.config.interface)?
            }
        };
        debug!(scheme = ?self.config.scheme, id = %id, "Resolved instance id");
        Ok(InstanceId::new(id, DRIVER_NAME))
    }

    async fn local_devices(&self) -> Result<LocalDevices> {
        let device_map = scan_by_id(&self.config.disk_by_id_path, self.config.naming())?;
        info!("Found {} local volume devices", device_map.len());
        Ok(LocalDevices {
            driver: DRIVER_NAME.to_string(),
            device_map,
        })
    }

    async fn next_device(&self) -> Result<String> {
        Err(Error::unsupported("next_device"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;

    fn executor_in(root: &std::path::Path) -> VmaxExecutor {
        VmaxExecutor::new(ExecutorConfig {
            initiator_file: root.join("initiatorname.iscsi"),
            net_class_path: root.join("net"),
            disk_by_id_path: root.join("by-id"),
            ..Default::default()
        })
    }

    #[test]
    fn test_executor_config_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.scheme, IdentityScheme::Iscsi);
        assert_eq!(config.initiator_file, PathBuf::from("/etc/iscsi/initiatorname.iscsi"));
        assert_eq!(config.disk_by_id_path, PathBuf::from("/dev/disk/by-id"));
        assert!(!config.device_mapper);
    }

    #[tokio::test]
    async fn test_instance_id_from_initiator_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("initiatorname.iscsi"),
            "InitiatorName=iqn.1994-05.com.redhat:a1b2c3\n",
        )
        .unwrap();

        let iid = executor_in(dir.path()).instance_id().await.unwrap();
        assert_eq!(iid.id, "iqn.1994-05.com.redhat:a1b2c3");
        assert_eq!(iid.driver, "vmax");
    }

    #[tokio::test]
    async fn test_instance_id_mac_scheme() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("net/eth0")).unwrap();
        std::fs::write(dir.path().join("net/eth0/address"), "52:54:00:ab:cd:ef\n").unwrap();

        let mut executor = executor_in(dir.path());
        executor.config.scheme = IdentityScheme::Mac;
        assert_eq!(executor.instance_id().await.unwrap().id, "52:54:00:ab:cd:ef");
    }

    #[tokio::test]
    async fn test_instance_id_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            executor_in(dir.path()).instance_id().await,
            Err(Error::HostIdentity(_))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_devices_device_mapper() {
        let wwn = "60000970000197900123533030334142";
        let dir = tempfile::tempdir().unwrap();
        let dm = dir.path().join("dm-3");
        std::fs::write(&dm, b"").unwrap();
        std::fs::create_dir(dir.path().join("by-id")).unwrap();
        std::os::unix::fs::symlink(&dm, dir.path().join(format!("by-id/dm-name-3{}", wwn)))
            .unwrap();
        std::os::unix::fs::symlink(&dm, dir.path().join(format!("by-id/wwn-0x{}", wwn))).unwrap();

        let mut executor = executor_in(dir.path());
        executor.config.device_mapper = true;
        let devices = executor.local_devices().await.unwrap();
        assert_eq!(devices.driver, "vmax");
        assert_eq!(devices.device_map.len(), 1);
        assert!(devices.device_map.contains_key(wwn));
    }

    #[tokio::test]
    async fn test_next_device_unsupported() {
        let executor = VmaxExecutor::default_executor();
        assert_eq!(
            executor.next_device().await.unwrap_err().kind(),
            ErrorKind::Unsupported
        );
    }
}
