//! VMAX Storage Driver
//!
//! Implements the volume-driver contract on top of the resolver, the volume
//! lifecycle manager and the attachment orchestrator.

use crate::config::DriverConfig;
use crate::domain::ports::{
    ArrayClientRef, Instance, InstanceId, NextDeviceInfo, Snapshot, StorageDriver, StorageType,
    Volume, VolumeAttachOpts, VolumeCreateOpts, VolumeDetachOpts, VolumeInspectOpts, VolumesOpts,
};
use crate::driver::attach::AttachmentOrchestrator;
use crate::driver::lifecycle::VolumeLifecycle;
use crate::driver::resolver::ResourceResolver;
use crate::driver::DRIVER_NAME;
use crate::error::{Error, Result, ResultExt};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Volume driver for one VMAX array
pub struct VmaxDriver {
    config: DriverConfig,
    client: ArrayClientRef,
    resolver: Arc<ResourceResolver>,
    lifecycle: Arc<VolumeLifecycle>,
    orchestrator: AttachmentOrchestrator,
}

impl VmaxDriver {
    /// Create a driver over an array client
    pub fn new(config: DriverConfig, client: ArrayClientRef) -> Self {
        let resolver = Arc::new(ResourceResolver::new(
            client.clone(),
            config.symmetrix_id.clone(),
            config.group_prefix.clone(),
        ));
        let lifecycle = Arc::new(VolumeLifecycle::new(
            client.clone(),
            resolver.clone(),
            config.default_group.clone(),
            DRIVER_NAME,
        ));
        let orchestrator = AttachmentOrchestrator::new(
            client.clone(),
            resolver.clone(),
            lifecycle.clone(),
            config.port_group.clone(),
        );

        Self {
            config,
            client,
            resolver,
            lifecycle,
            orchestrator,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Attachment orchestrator, for callers that want the full attach outcome
    pub fn orchestrator(&self) -> &AttachmentOrchestrator {
        &self.orchestrator
    }
}

#[async_trait]
impl StorageDriver for VmaxDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    async fn init(&self) -> Result<()> {
        debug!(endpoint = %self.config.endpoint, "Starting vmax driver");

        let info = self
            .client
            .get_symmetrix(&self.config.symmetrix_id)
            .await
            .context("get_symmetrix", &self.config.symmetrix_id)?;
        self.resolver
            .ensure_storage_group(&self.config.default_group)
            .await?;

        info!(
            endpoint = %self.config.endpoint,
            symmetrix = %info.symmetrix_id,
            model = %info.model,
            thin_or_thick = %self.config.thin_or_thick,
            default_group = %self.config.default_group,
            "Storage initialized"
        );
        Ok(())
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Block
    }

    async fn instance_inspect(&self, instance_id: &InstanceId) -> Result<Instance> {
        if instance_id.id.trim().is_empty() {
            return Err(Error::Configuration("instance initiator is empty".into()));
        }

        self.client
            .get_symmetrix(&self.config.symmetrix_id)
            .await
            .context("get_symmetrix", &self.config.symmetrix_id)?;

        let host_name = self.resolver.resolve_host_name(&instance_id.id);
        let name = match self
            .client
            .get_host(&self.config.symmetrix_id, &host_name)
            .await
        {
            Ok(host) => Some(host.host_id),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.context("get_host", &host_name)),
        };

        Ok(Instance {
            instance_id: instance_id.clone(),
            name,
            region: self.config.symmetrix_id.clone(),
        })
    }

    async fn volumes(&self, opts: VolumesOpts) -> Result<Vec<Volume>> {
        self.lifecycle.list(opts.attachments).await
    }

    async fn volume_inspect(&self, volume_id: &str, opts: VolumeInspectOpts) -> Result<Volume> {
        self.lifecycle.inspect(volume_id, opts.attachments).await
    }

    async fn volume_create(&self, name: &str, opts: VolumeCreateOpts) -> Result<Volume> {
        self.lifecycle.create(name, &opts).await
    }

    async fn volume_create_from_snapshot(
        &self,
        _snapshot_id: &str,
        _name: &str,
        _opts: VolumeCreateOpts,
    ) -> Result<Volume> {
        Err(Error::unsupported("volume_create_from_snapshot"))
    }

    async fn volume_copy(&self, _volume_id: &str, _name: &str) -> Result<Volume> {
        Err(Error::unsupported("volume_copy"))
    }

    async fn volume_snapshot(&self, _volume_id: &str, _snapshot_name: &str) -> Result<Snapshot> {
        Err(Error::unsupported("volume_snapshot"))
    }

    async fn volume_remove(&self, volume_id: &str) -> Result<()> {
        self.lifecycle.remove(volume_id).await
    }

    async fn volume_attach(
        &self,
        volume_id: &str,
        opts: VolumeAttachOpts,
    ) -> Result<(Volume, String)> {
        let outcome = self.orchestrator.attach(volume_id, &opts.instance_id).await?;
        let token = outcome.volume.id.clone();
        Ok((outcome.volume, token))
    }

    async fn volume_detach(&self, volume_id: &str, opts: VolumeDetachOpts) -> Result<Volume> {
        self.orchestrator.detach(volume_id, &opts.instance_id).await
    }

    async fn volume_detach_all(&self, _volume_id: &str) -> Result<()> {
        Err(Error::unsupported("volume_detach_all"))
    }

    async fn next_device_info(&self) -> Result<NextDeviceInfo> {
        Err(Error::unsupported("next_device_info"))
    }

    async fn snapshots(&self) -> Result<Vec<Snapshot>> {
        Err(Error::unsupported("snapshots"))
    }

    async fn snapshot_inspect(&self, _snapshot_id: &str) -> Result<Snapshot> {
        Err(Error::unsupported("snapshot_inspect"))
    }

    async fn snapshot_copy(
        &self,
        _snapshot_id: &str,
        _snapshot_name: &str,
        _destination_id: &str,
    ) -> Result<Snapshot> {
        Err(Error::unsupported("snapshot_copy"))
    }

    async fn snapshot_remove(&self, _snapshot_id: &str) -> Result<()> {
        Err(Error::unsupported("snapshot_remove"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::InMemoryArray;
    use crate::error::ErrorKind;

    const SYMM: &str = "000197900123";

    fn driver(array: Arc<InMemoryArray>) -> VmaxDriver {
        let mut config = DriverConfig::new("https://u4p.lab.local", SYMM);
        config.port_group = Some("libStorage_PG".into());
        VmaxDriver::new(config, array)
    }

    #[tokio::test]
    async fn test_init_creates_default_group() {
        let array = Arc::new(InMemoryArray::new(SYMM));
        driver(array.clone()).init().await.unwrap();
        assert_eq!(array.storage_group_count(), 1);
    }

    #[tokio::test]
    async fn test_init_unknown_array_fails() {
        let array = Arc::new(InMemoryArray::new("000000000001"));
        let err = driver(array).init().await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_instance_inspect_before_and_after_host_exists() {
        let array = Arc::new(InMemoryArray::new(SYMM).with_port_group("libStorage_PG"));
        let d = driver(array);
        d.init().await.unwrap();
        let iid = InstanceId::new("iqn.2001-04.com.example:node1", DRIVER_NAME);

        let before = d.instance_inspect(&iid).await.unwrap();
        assert_eq!(before.name, None);
        assert_eq!(before.region, SYMM);

        let volume = d
            .volume_create(
                "data01",
                VolumeCreateOpts {
                    size: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        d.volume_attach(
            &volume.id,
            VolumeAttachOpts {
                instance_id: iid.clone(),
                force: false,
            },
        )
        .await
        .unwrap();

        let after = d.instance_inspect(&iid).await.unwrap();
        assert_eq!(
            after.name.as_deref(),
            Some("libStorage_iqn200104comexamplenode1_IG")
        );
    }

    #[tokio::test]
    async fn test_unimplemented_operations_are_unsupported() {
        let d = driver(Arc::new(InMemoryArray::new(SYMM)));

        let results = vec![
            d.volume_copy("1", "copy").await.map(|_| ()),
            d.volume_snapshot("1", "snap").await.map(|_| ()),
            d.volume_create_from_snapshot("s1", "v", VolumeCreateOpts::default())
                .await
                .map(|_| ()),
            d.volume_detach_all("1").await,
            d.next_device_info().await.map(|_| ()),
            d.snapshots().await.map(|_| ()),
            d.snapshot_inspect("s1").await.map(|_| ()),
            d.snapshot_copy("s1", "s2", "dest").await.map(|_| ()),
            d.snapshot_remove("s1").await,
        ];
        for result in results {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::Unsupported);
        }
    }

    #[test]
    fn test_driver_identity() {
        let d = driver(Arc::new(InMemoryArray::new(SYMM)));
        assert_eq!(d.name(), "vmax");
        assert_eq!(d.storage_type(), StorageType::Block);
    }
}
