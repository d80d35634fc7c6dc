//! Volume Lifecycle Manager
//!
//! Create, inspect, list and remove volumes, mapping array volume details
//! into the generic [`Volume`] model.

use crate::domain::array::{CreateVolumeParam, VolumeDetails};
use crate::domain::ports::{
    ArrayClientRef, InstanceId, Volume, VolumeAttachment, VolumeCreateOpts,
};
use crate::driver::resolver::ResourceResolver;
use crate::error::{Error, Result, ResultExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Status reported for attachments resolved through masking views
pub const ATTACHMENT_STATUS: &str = "attached";

/// Manages volumes on one array
pub struct VolumeLifecycle {
    client: ArrayClientRef,
    resolver: Arc<ResourceResolver>,
    default_group: String,
    driver_name: String,
}

impl VolumeLifecycle {
    pub fn new(
        client: ArrayClientRef,
        resolver: Arc<ResourceResolver>,
        default_group: impl Into<String>,
        driver_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            resolver,
            default_group: default_group.into(),
            driver_name: driver_name.into(),
        }
    }

    fn array_id(&self) -> &str {
        self.resolver.array_id()
    }

    /// Group holding volumes that are not attached to any host
    pub fn default_group(&self) -> &str {
        &self.default_group
    }

    /// Allocate a single volume in the default group
    pub async fn create(&self, name: &str, opts: &VolumeCreateOpts) -> Result<Volume> {
        let size = opts
            .size
            .ok_or_else(|| Error::Configuration("volume size is required".into()))?;
        if size <= 0 {
            return Err(Error::Configuration(format!(
                "volume size must be positive, got {}",
                size
            )));
        }
        if name.trim().is_empty() {
            return Err(Error::Configuration("volume name is required".into()));
        }

        debug!(volume = name, size, "Creating volume");

        self.resolver
            .ensure_storage_group(&self.default_group)
            .await?;

        let param = CreateVolumeParam::new(name, size);
        let volume_id = self
            .client
            .create_volume(self.array_id(), &self.default_group, &param)
            .await
            .context("create_volume", name)?;

        info!(volume = name, volume_id = %volume_id, size, "Created volume");

        Ok(Volume {
            id: volume_id,
            name: name.to_string(),
            size,
            volume_type: opts.volume_type.clone().unwrap_or_default(),
            availability_zone: opts.availability_zone.clone().unwrap_or_default(),
            status: String::new(),
            attachments: Vec::new(),
        })
    }

    /// Fetch one volume, optionally with the initiators that can see it
    pub async fn inspect(&self, volume_id: &str, attachments: bool) -> Result<Volume> {
        if volume_id.is_empty() {
            return Err(Error::Configuration("no volume ID specified".into()));
        }

        let details = self
            .client
            .get_volume(self.array_id(), volume_id)
            .await
            .context("get_volume", volume_id)?;
        let mut volume = to_volume(details);

        if attachments {
            let initiators = self
                .client
                .get_attachments(self.array_id(), volume_id)
                .await
                .context("get_attachments", volume_id)?;
            volume.attachments = initiators
                .into_iter()
                .map(|initiator| VolumeAttachment {
                    instance_id: InstanceId::new(initiator, &self.driver_name),
                    volume_id: volume_id.to_string(),
                    device_name: None,
                    status: ATTACHMENT_STATUS.to_string(),
                })
                .collect();
        }

        Ok(volume)
    }

    /// Every volume on the array, each fully inspected
    pub async fn list(&self, attachments: bool) -> Result<Vec<Volume>> {
        let ids = self
            .client
            .list_volumes(self.array_id())
            .await
            .context("list_volumes", self.array_id())?;

        debug!(count = ids.len(), "Inspecting listed volumes");

        let mut volumes = Vec::with_capacity(ids.len());
        for id in &ids {
            volumes.push(self.inspect(id, attachments).await?);
        }
        Ok(volumes)
    }

    /// Delete a volume
    pub async fn remove(&self, volume_id: &str) -> Result<()> {
        if volume_id.is_empty() {
            return Err(Error::Configuration("no volume ID specified".into()));
        }

        self.client
            .delete_volume(self.array_id(), volume_id)
            .await
            .context("delete_volume", volume_id)?;

        info!(volume_id, "Removed volume");
        Ok(())
    }
}

fn to_volume(details: VolumeDetails) -> Volume {
    Volume {
        id: details.volume_id,
        name: details.volume_identifier,
        size: details.cap_gb.round() as i64,
        volume_type: details.volume_type,
        availability_zone: String::new(),
        status: details.status,
        attachments: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::InMemoryArray;
    use assert_matches::assert_matches;

    const SYMM: &str = "000197900123";
    const DEFAULT_GROUP: &str = "libStorage_default";

    fn lifecycle(array: Arc<InMemoryArray>) -> VolumeLifecycle {
        let resolver = Arc::new(ResourceResolver::new(array.clone(), SYMM, "libStorage_"));
        VolumeLifecycle::new(array, resolver, DEFAULT_GROUP, "vmax")
    }

    #[tokio::test]
    async fn test_create_without_size_makes_no_array_call() {
        let array = Arc::new(InMemoryArray::new(SYMM));
        let lc = lifecycle(array.clone());

        let err = lc
            .create("data01", &VolumeCreateOpts::default())
            .await
            .unwrap_err();
        assert_matches!(err, Error::Configuration(_));
        assert_eq!(array.calls(), 0);
    }

    #[tokio::test]
    async fn test_create_populates_from_request() {
        let array = Arc::new(InMemoryArray::new(SYMM));
        let lc = lifecycle(array.clone());

        let volume = lc
            .create(
                "data01",
                &VolumeCreateOpts {
                    size: Some(8),
                    volume_type: Some("gold".into()),
                    availability_zone: Some("rack-a".into()),
                },
            )
            .await
            .unwrap();

        assert!(!volume.id.is_empty());
        assert_eq!(volume.size, 8);
        assert_eq!(volume.volume_type, "gold");
        assert_eq!(volume.availability_zone, "rack-a");
        assert_eq!(array.volume_count(), 1);
    }

    #[tokio::test]
    async fn test_inspect_empty_id_makes_no_array_call() {
        let array = Arc::new(InMemoryArray::new(SYMM));
        let lc = lifecycle(array.clone());

        assert_matches!(lc.inspect("", true).await, Err(Error::Configuration(_)));
        assert_eq!(array.calls(), 0);
    }

    #[tokio::test]
    async fn test_list_inspects_each_volume() {
        let array = Arc::new(InMemoryArray::new(SYMM));
        array.insert_volume("1", "first", 1, None);
        array.insert_volume("2", "second", 2, None);
        let lc = lifecycle(array);

        let volumes = lc.list(false).await.unwrap();
        let ids: Vec<&str> = volumes.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(volumes[1].name, "second");
        assert_eq!(volumes[1].size, 2);

        for volume in &volumes {
            assert_eq!(lc.inspect(&volume.id, false).await.unwrap().id, volume.id);
        }
    }

    #[tokio::test]
    async fn test_remove_missing_volume_is_not_found() {
        let lc = lifecycle(Arc::new(InMemoryArray::new(SYMM)));
        let err = lc.remove("0FFFF").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
