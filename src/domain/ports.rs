//! Domain Ports - Core trait definitions for the volume driver
//!
//! These traits define the boundaries between the orchestration logic and
//! external systems: the array management plane below, volume-driver callers
//! above, and the local host on the executor side.

use crate::domain::array::{
    CreateMaskingViewParam, CreateVolumeParam, Host, MaskingView, StorageGroup, SymmetrixInfo,
    VolumeDetails,
};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// =============================================================================
// Storage Types
// =============================================================================

/// Storage types a volume driver can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Block,
    Nas,
    Object,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::Block => write!(f, "block"),
            StorageType::Nas => write!(f, "nas"),
            StorageType::Object => write!(f, "object"),
        }
    }
}

// =============================================================================
// Instances
// =============================================================================

/// Identity of a compute host as seen by the array: its storage initiator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceId {
    /// Initiator identifier (iSCSI IQN, or MAC address in the legacy scheme)
    pub id: String,
    /// Driver that produced this identity
    pub driver: String,
}

impl InstanceId {
    pub fn new(id: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            driver: driver.into(),
        }
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.driver, self.id)
    }
}

/// Compute host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub instance_id: InstanceId,
    /// Host record name on the array, when one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Array the instance was resolved against
    pub region: String,
}

// =============================================================================
// Volumes
// =============================================================================

/// Binding of a volume to an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachment {
    pub instance_id: InstanceId,
    pub volume_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub status: String,
}

/// Array-provisioned block device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub id: String,
    pub name: String,
    /// Capacity in GB
    pub size: i64,
    #[serde(rename = "type")]
    pub volume_type: String,
    pub availability_zone: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<VolumeAttachment>,
}

/// Options for volume creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCreateOpts {
    /// Capacity in GB
    pub size: Option<i64>,
    #[serde(rename = "type")]
    pub volume_type: Option<String>,
    pub availability_zone: Option<String>,
}

/// Options for volume inspection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VolumeInspectOpts {
    /// Populate attachment info
    pub attachments: bool,
}

/// Options for volume listing
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VolumesOpts {
    /// Populate attachment info
    pub attachments: bool,
}

/// Options for volume attach
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAttachOpts {
    /// Instance the volume is attached to
    pub instance_id: InstanceId,
    #[serde(default)]
    pub force: bool,
}

/// Options for volume detach
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeDetachOpts {
    /// Instance the volume is detached from
    pub instance_id: InstanceId,
    #[serde(default)]
    pub force: bool,
}

/// Point-in-time copy of a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub volume_id: String,
    pub volume_size: i64,
}

/// Hints for predicting the device name of the next attached volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextDeviceInfo {
    pub prefix: String,
    pub pattern: String,
    pub ignore: bool,
}

/// Local devices keyed by volume WWN
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDevices {
    pub driver: String,
    /// WWN -> device path
    pub device_map: BTreeMap<String, String>,
}

// =============================================================================
// Array Client Port
// =============================================================================

/// Port for the array management plane.
///
/// Every method reports an absent resource as [`crate::Error::NotFound`] so
/// callers can branch on it without inspecting messages.
#[async_trait]
pub trait ArrayClient: Send + Sync {
    async fn get_symmetrix(&self, array_id: &str) -> Result<SymmetrixInfo>;

    async fn get_storage_group(&self, array_id: &str, group_id: &str) -> Result<StorageGroup>;

    /// Create an empty storage group
    async fn create_storage_group(&self, array_id: &str, group_id: &str) -> Result<StorageGroup>;

    async fn delete_storage_group(&self, array_id: &str, group_id: &str) -> Result<()>;

    async fn add_volume_to_storage_group(
        &self,
        array_id: &str,
        group_id: &str,
        volume_id: &str,
    ) -> Result<()>;

    async fn remove_volume_from_storage_group(
        &self,
        array_id: &str,
        group_id: &str,
        volume_id: &str,
    ) -> Result<()>;

    async fn get_host(&self, array_id: &str, host_id: &str) -> Result<Host>;

    async fn create_host(&self, array_id: &str, host_id: &str, initiators: &[String])
        -> Result<Host>;

    async fn list_hosts(&self, array_id: &str) -> Result<Vec<String>>;

    async fn get_masking_view(&self, array_id: &str, view_id: &str) -> Result<MaskingView>;

    async fn create_masking_view(
        &self,
        array_id: &str,
        param: &CreateMaskingViewParam,
    ) -> Result<MaskingView>;

    /// List the IDs of every volume on the array
    async fn list_volumes(&self, array_id: &str) -> Result<Vec<String>>;

    async fn get_volume(&self, array_id: &str, volume_id: &str) -> Result<VolumeDetails>;

    /// Allocate a single volume into a storage group, returning its ID
    async fn create_volume(
        &self,
        array_id: &str,
        group_id: &str,
        param: &CreateVolumeParam,
    ) -> Result<String>;

    async fn delete_volume(&self, array_id: &str, volume_id: &str) -> Result<()>;

    /// Initiators that can see a volume.
    ///
    /// Resolved by walking volume -> storage groups -> masking views -> hosts.
    async fn get_attachments(&self, array_id: &str, volume_id: &str) -> Result<Vec<String>> {
        let volume = self.get_volume(array_id, volume_id).await?;
        let mut initiators = BTreeSet::new();

        for group_id in &volume.storage_groups {
            let group = self.get_storage_group(array_id, group_id).await?;
            for view_id in &group.masking_views {
                let view = self.get_masking_view(array_id, view_id).await?;
                let host = self.get_host(array_id, &view.host_id).await?;
                initiators.extend(host.initiators);
            }
        }

        Ok(initiators.into_iter().collect())
    }
}

// =============================================================================
// Storage Driver Port
// =============================================================================

/// Port exposed to volume-driver callers
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name
    fn name(&self) -> &str;

    /// Verify the configured array is reachable
    async fn init(&self) -> Result<()>;

    /// Type of storage this driver provides
    fn storage_type(&self) -> StorageType;

    /// Resolve an instance against the array
    async fn instance_inspect(&self, instance_id: &InstanceId) -> Result<Instance>;

    /// List all volumes
    async fn volumes(&self, opts: VolumesOpts) -> Result<Vec<Volume>>;

    /// Inspect a single volume
    async fn volume_inspect(&self, volume_id: &str, opts: VolumeInspectOpts) -> Result<Volume>;

    /// Create a volume
    async fn volume_create(&self, name: &str, opts: VolumeCreateOpts) -> Result<Volume>;

    /// Create a volume from a snapshot
    async fn volume_create_from_snapshot(
        &self,
        snapshot_id: &str,
        name: &str,
        opts: VolumeCreateOpts,
    ) -> Result<Volume>;

    /// Copy a volume
    async fn volume_copy(&self, volume_id: &str, name: &str) -> Result<Volume>;

    /// Snapshot a volume
    async fn volume_snapshot(&self, volume_id: &str, snapshot_name: &str) -> Result<Snapshot>;

    /// Remove a volume
    async fn volume_remove(&self, volume_id: &str) -> Result<()>;

    /// Attach a volume, returning the refreshed volume and its attach token
    async fn volume_attach(&self, volume_id: &str, opts: VolumeAttachOpts)
        -> Result<(Volume, String)>;

    /// Detach a volume
    async fn volume_detach(&self, volume_id: &str, opts: VolumeDetachOpts) -> Result<Volume>;

    /// Detach a volume from every instance
    async fn volume_detach_all(&self, volume_id: &str) -> Result<()>;

    /// Device naming hints for the next attachment
    async fn next_device_info(&self) -> Result<NextDeviceInfo>;

    /// List snapshots
    async fn snapshots(&self) -> Result<Vec<Snapshot>>;

    /// Inspect a snapshot
    async fn snapshot_inspect(&self, snapshot_id: &str) -> Result<Snapshot>;

    /// Copy a snapshot
    async fn snapshot_copy(
        &self,
        snapshot_id: &str,
        snapshot_name: &str,
        destination_id: &str,
    ) -> Result<Snapshot>;

    /// Remove a snapshot
    async fn snapshot_remove(&self, snapshot_id: &str) -> Result<()>;
}

// =============================================================================
// Storage Executor Port
// =============================================================================

/// Port for operations that run on the host consuming volumes
#[async_trait]
pub trait StorageExecutor: Send + Sync {
    /// Executor name
    fn name(&self) -> &str;

    /// Identity of the local host
    async fn instance_id(&self) -> Result<InstanceId>;

    /// Local block devices keyed by WWN
    async fn local_devices(&self) -> Result<LocalDevices>;

    /// Next available device name
    async fn next_device(&self) -> Result<String>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ArrayClientRef = Arc<dyn ArrayClient>;
pub type StorageDriverRef = Arc<dyn StorageDriver>;
pub type StorageExecutorRef = Arc<dyn StorageExecutor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_display() {
        assert_eq!(format!("{}", StorageType::Block), "block");
        assert_eq!(format!("{}", StorageType::Nas), "nas");
        assert_eq!(format!("{}", StorageType::Object), "object");
    }

    #[test]
    fn test_volume_serializes_camel_case() {
        let volume = Volume {
            id: "0012A".into(),
            name: "data01".into(),
            size: 10,
            volume_type: "TDEV".into(),
            availability_zone: String::new(),
            status: "Ready".into(),
            attachments: vec![],
        };
        let json = serde_json::to_value(&volume).unwrap();
        assert_eq!(json["availabilityZone"], "");
        assert_eq!(json["type"], "TDEV");
        assert!(json.get("attachments").is_none());
    }
}
