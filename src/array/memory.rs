//! In-Memory Array
//!
//! A single simulated Symmetrix holding storage groups, hosts, masking views
//! and volumes. Backs the standalone mode of the binary and the test suites.
//! Rejections mirror what Unisphere reports: duplicates are conflicts, absent
//! resources are not-found.

use crate::domain::array::{
    CreateMaskingViewParam, CreateVolumeParam, Host, MaskingView, StorageGroup, SymmetrixInfo,
    VolumeDetails,
};
use crate::domain::ports::ArrayClient;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

// =============================================================================
// Array State
// =============================================================================

#[derive(Debug, Clone)]
struct VolumeState {
    identifier: String,
    cap_gb: f64,
    emulation: String,
    wwn: String,
}

#[derive(Debug, Default)]
struct ArrayState {
    groups: BTreeMap<String, BTreeSet<String>>,
    hosts: BTreeMap<String, Vec<String>>,
    views: BTreeMap<String, MaskingView>,
    port_groups: BTreeSet<String>,
    volumes: BTreeMap<String, VolumeState>,
    next_volume: u32,
}

impl ArrayState {
    fn views_of_group(&self, group_id: &str) -> Vec<String> {
        self.views
            .values()
            .filter(|v| v.storage_group_id == group_id)
            .map(|v| v.masking_view_id.clone())
            .collect()
    }

    fn views_of_host(&self, host_id: &str) -> Vec<String> {
        self.views
            .values()
            .filter(|v| v.host_id == host_id)
            .map(|v| v.masking_view_id.clone())
            .collect()
    }

    fn groups_of_volume(&self, volume_id: &str) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, members)| members.contains(volume_id))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

// =============================================================================
// In-Memory Array
// =============================================================================

/// Simulated array implementing [`ArrayClient`]
pub struct InMemoryArray {
    symmetrix_id: String,
    state: RwLock<ArrayState>,
    failures: RwLock<BTreeSet<String>>,
    calls: AtomicUsize,
}

impl InMemoryArray {
    /// Create an empty array
    pub fn new(symmetrix_id: impl Into<String>) -> Self {
        Self {
            symmetrix_id: symmetrix_id.into(),
            state: RwLock::new(ArrayState::default()),
            failures: RwLock::new(BTreeSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Add a port group that masking views can bind
    pub fn with_port_group(self, port_group: impl Into<String>) -> Self {
        self.state.write().port_groups.insert(port_group.into());
        self
    }

    /// Add an empty storage group
    pub fn with_storage_group(self, group_id: impl Into<String>) -> Self {
        self.state
            .write()
            .groups
            .entry(group_id.into())
            .or_default();
        self
    }

    /// Insert a volume with a fixed ID, optionally placing it in a group
    pub fn insert_volume(&self, volume_id: &str, name: &str, size_gb: i64, group: Option<&str>) {
        let mut state = self.state.write();
        state.volumes.insert(
            volume_id.to_string(),
            VolumeState {
                identifier: name.to_string(),
                cap_gb: size_gb as f64,
                emulation: crate::domain::array::EMULATION_FBA.to_string(),
                wwn: synthetic_wwn(volume_id),
            },
        );
        if let Some(group) = group {
            state
                .groups
                .entry(group.to_string())
                .or_default()
                .insert(volume_id.to_string());
        }
    }

    /// Make every call to `operation` fail with an array error
    pub fn fail_operation(&self, operation: &str) {
        self.failures.write().insert(operation.to_string());
    }

    /// Number of client calls served
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of volumes on the array
    pub fn volume_count(&self) -> usize {
        self.state.read().volumes.len()
    }

    /// Number of storage groups on the array
    pub fn storage_group_count(&self) -> usize {
        self.state.read().groups.len()
    }

    fn record(&self, operation: &str, array_id: &str, target: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(operation, target, "in-memory array call");

        if self.failures.read().contains(operation) {
            return Err(Error::Array {
                operation: operation.to_string(),
                target: target.to_string(),
                reason: "injected failure".into(),
            });
        }
        if array_id != self.symmetrix_id {
            return Err(Error::not_found("Symmetrix", array_id));
        }
        Ok(())
    }
}

#[async_trait]
impl ArrayClient for InMemoryArray {
    async fn get_symmetrix(&self, array_id: &str) -> Result<SymmetrixInfo> {
        self.record("get_symmetrix", array_id, array_id)?;
        Ok(SymmetrixInfo {
            symmetrix_id: self.symmetrix_id.clone(),
            model: "VMAX250F".into(),
            ucode: "5978.221.221".into(),
            local: true,
        })
    }

    async fn get_storage_group(&self, array_id: &str, group_id: &str) -> Result<StorageGroup> {
        self.record("get_storage_group", array_id, group_id)?;
        let state = self.state.read();
        let members = state
            .groups
            .get(group_id)
            .ok_or_else(|| Error::not_found("StorageGroup", group_id))?;

        Ok(StorageGroup {
            storage_group_id: group_id.to_string(),
            num_of_vols: members.len() as u32,
            masking_views: state.views_of_group(group_id),
        })
    }

    async fn create_storage_group(&self, array_id: &str, group_id: &str) -> Result<StorageGroup> {
        self.record("create_storage_group", array_id, group_id)?;
        let mut state = self.state.write();
        if state.groups.contains_key(group_id) {
            return Err(Error::Conflict {
                kind: "StorageGroup".into(),
                name: group_id.into(),
                reason: "already exists".into(),
            });
        }
        state.groups.insert(group_id.to_string(), BTreeSet::new());

        Ok(StorageGroup {
            storage_group_id: group_id.to_string(),
            ..Default::default()
        })
    }

    async fn delete_storage_group(&self, array_id: &str, group_id: &str) -> Result<()> {
        self.record("delete_storage_group", array_id, group_id)?;
        let mut state = self.state.write();
        let members = state
            .groups
            .get(group_id)
            .ok_or_else(|| Error::not_found("StorageGroup", group_id))?;

        let reason = if !members.is_empty() {
            Some("group still holds volumes")
        } else if !state.views_of_group(group_id).is_empty() {
            Some("group is part of a masking view")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(Error::Conflict {
                kind: "StorageGroup".into(),
                name: group_id.into(),
                reason: reason.into(),
            });
        }

        state.groups.remove(group_id);
        Ok(())
    }

    async fn add_volume_to_storage_group(
        &self,
        array_id: &str,
        group_id: &str,
        volume_id: &str,
    ) -> Result<()> {
        self.record("add_volume_to_storage_group", array_id, group_id)?;
        let mut state = self.state.write();
        if !state.volumes.contains_key(volume_id) {
            return Err(Error::not_found("Volume", volume_id));
        }
        let members = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| Error::not_found("StorageGroup", group_id))?;

        if !members.insert(volume_id.to_string()) {
            return Err(Error::Conflict {
                kind: "StorageGroup".into(),
                name: group_id.into(),
                reason: format!("volume {} is already a member", volume_id),
            });
        }
        Ok(())
    }

    async fn remove_volume_from_storage_group(
        &self,
        array_id: &str,
        group_id: &str,
        volume_id: &str,
    ) -> Result<()> {
        self.record("remove_volume_from_storage_group", array_id, group_id)?;
        let mut state = self.state.write();
        let members = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| Error::not_found("StorageGroup", group_id))?;

        if !members.remove(volume_id) {
            return Err(Error::not_found(
                "StorageGroupVolume",
                format!("{}/{}", group_id, volume_id),
            ));
        }
        Ok(())
    }

    async fn get_host(&self, array_id: &str, host_id: &str) -> Result<Host> {
        self.record("get_host", array_id, host_id)?;
        let state = self.state.read();
        let initiators = state
            .hosts
            .get(host_id)
            .ok_or_else(|| Error::not_found("Host", host_id))?;

        Ok(Host {
            host_id: host_id.to_string(),
            initiators: initiators.clone(),
            masking_views: state.views_of_host(host_id),
        })
    }

    async fn create_host(
        &self,
        array_id: &str,
        host_id: &str,
        initiators: &[String],
    ) -> Result<Host> {
        self.record("create_host", array_id, host_id)?;
        let mut state = self.state.write();
        if state.hosts.contains_key(host_id) {
            return Err(Error::Conflict {
                kind: "Host".into(),
                name: host_id.into(),
                reason: "already exists".into(),
            });
        }
        for initiator in initiators {
            let taken = state
                .hosts
                .iter()
                .find(|(_, existing)| existing.iter().any(|i| i.eq_ignore_ascii_case(initiator)));
            if let Some((owner, _)) = taken {
                return Err(Error::Conflict {
                    kind: "Host".into(),
                    name: host_id.into(),
                    reason: format!("initiator {} already belongs to host {}", initiator, owner),
                });
            }
        }
        state.hosts.insert(host_id.to_string(), initiators.to_vec());

        Ok(Host {
            host_id: host_id.to_string(),
            initiators: initiators.to_vec(),
            masking_views: Vec::new(),
        })
    }

    async fn list_hosts(&self, array_id: &str) -> Result<Vec<String>> {
        self.record("list_hosts", array_id, array_id)?;
        Ok(self.state.read().hosts.keys().cloned().collect())
    }

    async fn get_masking_view(&self, array_id: &str, view_id: &str) -> Result<MaskingView> {
        self.record("get_masking_view", array_id, view_id)?;
        self.state
            .read()
            .views
            .get(view_id)
            .cloned()
            .ok_or_else(|| Error::not_found("MaskingView", view_id))
    }

    async fn create_masking_view(
        &self,
        array_id: &str,
        param: &CreateMaskingViewParam,
    ) -> Result<MaskingView> {
        self.record("create_masking_view", array_id, &param.masking_view_id)?;
        let mut state = self.state.write();
        if state.views.contains_key(&param.masking_view_id) {
            return Err(Error::Conflict {
                kind: "MaskingView".into(),
                name: param.masking_view_id.clone(),
                reason: "already exists".into(),
            });
        }
        if !state.hosts.contains_key(&param.host_id) {
            return Err(Error::not_found("Host", &param.host_id));
        }
        if !state.groups.contains_key(&param.storage_group_id) {
            return Err(Error::not_found("StorageGroup", &param.storage_group_id));
        }
        if !state.port_groups.contains(&param.port_group_id) {
            return Err(Error::not_found("PortGroup", &param.port_group_id));
        }

        let view = MaskingView {
            masking_view_id: param.masking_view_id.clone(),
            host_id: param.host_id.clone(),
            port_group_id: param.port_group_id.clone(),
            storage_group_id: param.storage_group_id.clone(),
        };
        state.views.insert(view.masking_view_id.clone(), view.clone());
        Ok(view)
    }

    async fn list_volumes(&self, array_id: &str) -> Result<Vec<String>> {
        self.record("list_volumes", array_id, array_id)?;
        Ok(self.state.read().volumes.keys().cloned().collect())
    }

    async fn get_volume(&self, array_id: &str, volume_id: &str) -> Result<VolumeDetails> {
        self.record("get_volume", array_id, volume_id)?;
        let state = self.state.read();
        let volume = state
            .volumes
            .get(volume_id)
            .ok_or_else(|| Error::not_found("Volume", volume_id))?;

        Ok(VolumeDetails {
            volume_id: volume_id.to_string(),
            volume_identifier: volume.identifier.clone(),
            volume_type: "TDEV".into(),
            cap_gb: volume.cap_gb,
            emulation: volume.emulation.clone(),
            status: "Ready".into(),
            storage_groups: state.groups_of_volume(volume_id),
            wwn: volume.wwn.clone(),
        })
    }

    async fn create_volume(
        &self,
        array_id: &str,
        group_id: &str,
        param: &CreateVolumeParam,
    ) -> Result<String> {
        self.record("create_volume", array_id, group_id)?;
        let mut state = self.state.write();
        if !state.groups.contains_key(group_id) {
            return Err(Error::not_found("StorageGroup", group_id));
        }

        state.next_volume += 1;
        let volume_id = format!("{:05X}", state.next_volume);
        state.volumes.insert(
            volume_id.clone(),
            VolumeState {
                identifier: param.name.clone(),
                cap_gb: param.size_gb as f64,
                emulation: param.emulation.clone(),
                wwn: synthetic_wwn(&volume_id),
            },
        );
        if let Some(members) = state.groups.get_mut(group_id) {
            members.insert(volume_id.clone());
        }

        Ok(volume_id)
    }

    async fn delete_volume(&self, array_id: &str, volume_id: &str) -> Result<()> {
        self.record("delete_volume", array_id, volume_id)?;
        let mut state = self.state.write();
        if !state.volumes.contains_key(volume_id) {
            return Err(Error::not_found("Volume", volume_id));
        }

        let groups = state.groups_of_volume(volume_id);
        if groups.iter().any(|g| !state.views_of_group(g).is_empty()) {
            return Err(Error::Conflict {
                kind: "Volume".into(),
                name: volume_id.into(),
                reason: "volume is masked to a host".into(),
            });
        }

        for group in groups {
            if let Some(members) = state.groups.get_mut(&group) {
                members.remove(volume_id);
            }
        }
        state.volumes.remove(volume_id);
        Ok(())
    }
}

/// Deterministic 32-character WWN derived from the volume ID
fn synthetic_wwn(volume_id: &str) -> String {
    let hex: String = volume_id.bytes().map(|b| format!("{:02x}", b)).collect();
    format!("6000097{:0>25}", hex)
        .chars()
        .take(32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SYMM: &str = "000197900123";

    #[tokio::test]
    async fn test_unknown_array_is_not_found() {
        let array = InMemoryArray::new(SYMM);
        assert_matches!(
            array.get_symmetrix("000000000000").await,
            Err(Error::NotFound { .. })
        );
        assert!(array.get_symmetrix(SYMM).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_volume_lands_in_group() {
        let array = InMemoryArray::new(SYMM).with_storage_group("sg_default");
        let id = array
            .create_volume(SYMM, "sg_default", &CreateVolumeParam::new("data01", 10))
            .await
            .unwrap();

        let volume = array.get_volume(SYMM, &id).await.unwrap();
        assert_eq!(volume.volume_identifier, "data01");
        assert_eq!(volume.cap_gb, 10.0);
        assert_eq!(volume.storage_groups, vec!["sg_default".to_string()]);
        assert_eq!(volume.wwn.len(), 32);
    }

    #[tokio::test]
    async fn test_duplicate_membership_is_conflict() {
        let array = InMemoryArray::new(SYMM).with_storage_group("sg1");
        array.insert_volume("00001", "a", 1, Some("sg1"));
        assert_matches!(
            array.add_volume_to_storage_group(SYMM, "sg1", "00001").await,
            Err(Error::Conflict { .. })
        );
    }

    #[tokio::test]
    async fn test_remove_non_member_is_not_found() {
        let array = InMemoryArray::new(SYMM).with_storage_group("sg1");
        array.insert_volume("00001", "a", 1, None);
        let err = array
            .remove_volume_from_storage_group(SYMM, "sg1", "00001")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_attachments_follow_masking_views() {
        let array = InMemoryArray::new(SYMM)
            .with_port_group("pg1")
            .with_storage_group("sg1");
        array.insert_volume("00001", "a", 1, Some("sg1"));
        array
            .create_host(SYMM, "h1", &["iqn.2001-04.com.example:node1".to_string()])
            .await
            .unwrap();
        assert!(array.get_attachments(SYMM, "00001").await.unwrap().is_empty());

        array
            .create_masking_view(
                SYMM,
                &CreateMaskingViewParam {
                    masking_view_id: "mv1".into(),
                    host_id: "h1".into(),
                    port_group_id: "pg1".into(),
                    storage_group_id: "sg1".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            array.get_attachments(SYMM, "00001").await.unwrap(),
            vec!["iqn.2001-04.com.example:node1".to_string()]
        );
        assert_matches!(
            array.delete_volume(SYMM, "00001").await,
            Err(Error::Conflict { .. })
        );
    }

    #[test]
    fn test_storage_group_create_delete() {
        use tokio_test::{assert_err, assert_ok};

        let array = InMemoryArray::new(SYMM);
        tokio_test::block_on(async {
            assert_ok!(array.create_storage_group(SYMM, "sg1").await);
            assert_err!(array.create_storage_group(SYMM, "sg1").await);

            array.insert_volume("00001", "a", 1, Some("sg1"));
            assert_matches!(
                array.delete_storage_group(SYMM, "sg1").await,
                Err(Error::Conflict { .. })
            );

            assert_ok!(array.remove_volume_from_storage_group(SYMM, "sg1", "00001").await);
            assert_ok!(array.delete_storage_group(SYMM, "sg1").await);
            assert!(array.get_storage_group(SYMM, "sg1").await.unwrap_err().is_not_found());
        });
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let array = InMemoryArray::new(SYMM);
        array.fail_operation("get_storage_group");
        let err = array.get_storage_group(SYMM, "sg1").await.unwrap_err();
        assert!(!err.is_not_found());
        assert_eq!(array.calls(), 1);
    }
}
