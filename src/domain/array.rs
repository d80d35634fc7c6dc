//! Array resource model
//!
//! Resources as the Unisphere management plane reports them. Field names
//! follow the Unisphere JSON wire format.

use serde::{Deserialize, Serialize};

/// Emulation used for every volume this driver allocates
pub const EMULATION_FBA: &str = "FBA";

/// Capacity unit used for every volume this driver allocates
pub const CAPACITY_UNIT_GB: &str = "GB";

/// Array summary returned by the symmetrix endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetrixInfo {
    pub symmetrix_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub ucode: String,
    #[serde(default)]
    pub local: bool,
}

/// Named collection of volumes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageGroup {
    pub storage_group_id: String,
    #[serde(default, rename = "num_of_vols")]
    pub num_of_vols: u32,
    /// Masking views this group participates in
    #[serde(default, rename = "maskingview")]
    pub masking_views: Vec<String>,
}

/// Host record (initiator group)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub host_id: String,
    #[serde(default, rename = "initiator")]
    pub initiators: Vec<String>,
    #[serde(default, rename = "maskingview")]
    pub masking_views: Vec<String>,
}

impl Host {
    /// Check whether an initiator is registered on this host.
    ///
    /// IQNs are case-insensitive on the wire; the array upper-cases some.
    pub fn has_initiator(&self, initiator: &str) -> bool {
        self.initiators
            .iter()
            .any(|i| i.eq_ignore_ascii_case(initiator))
    }
}

/// Binding of a host, a port group and a storage group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskingView {
    pub masking_view_id: String,
    pub host_id: String,
    #[serde(default)]
    pub port_group_id: String,
    pub storage_group_id: String,
}

/// Volume details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeDetails {
    #[serde(rename = "volumeId")]
    pub volume_id: String,
    #[serde(default, rename = "volume_identifier")]
    pub volume_identifier: String,
    #[serde(default, rename = "type")]
    pub volume_type: String,
    #[serde(default, rename = "cap_gb")]
    pub cap_gb: f64,
    #[serde(default)]
    pub emulation: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "storageGroupId")]
    pub storage_groups: Vec<String>,
    #[serde(default)]
    pub wwn: String,
}

impl VolumeDetails {
    /// Check whether the volume is a member of a storage group
    pub fn in_group(&self, group: &str) -> bool {
        self.storage_groups.iter().any(|g| g == group)
    }
}

/// Allocation request for a single new volume
#[derive(Debug, Clone, PartialEq)]
pub struct CreateVolumeParam {
    /// Volume identifier recorded on the array
    pub name: String,
    pub size_gb: i64,
    pub emulation: String,
}

impl CreateVolumeParam {
    pub fn new(name: impl Into<String>, size_gb: i64) -> Self {
        Self {
            name: name.into(),
            size_gb,
            emulation: EMULATION_FBA.to_string(),
        }
    }
}

/// Request for a new masking view over existing resources
#[derive(Debug, Clone, PartialEq)]
pub struct CreateMaskingViewParam {
    pub masking_view_id: String,
    pub host_id: String,
    pub port_group_id: String,
    pub storage_group_id: String,
}
