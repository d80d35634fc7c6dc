//! Driver Metrics
//!
//! Prometheus counters for volume operations and an attach latency
//! histogram, plus [`InstrumentedDriver`], which records them around any
//! [`StorageDriver`].

use crate::domain::ports::{
    Instance, InstanceId, NextDeviceInfo, Snapshot, StorageDriver, StorageDriverRef, StorageType,
    Volume, VolumeAttachOpts, VolumeCreateOpts, VolumeDetachOpts, VolumeInspectOpts, VolumesOpts,
};
use crate::error::Result;
use async_trait::async_trait;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;

// =============================================================================
// Metrics Registry
// =============================================================================

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";

/// Operation counters and attach latency
pub struct DriverMetrics {
    registry: Registry,
    operations: IntCounterVec,
    attach_duration: Histogram,
}

impl DriverMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new(
                "vmax_driver_operations_total",
                "Volume operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )?;
        let attach_duration = Histogram::with_opts(HistogramOpts::new(
            "vmax_driver_attach_duration_seconds",
            "Duration of volume attach requests",
        ))?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(attach_duration.clone()))?;

        Ok(Self {
            registry,
            operations,
            attach_duration,
        })
    }

    /// Count one completed operation
    pub fn record<T>(&self, operation: &str, result: &Result<T>) {
        let outcome = if result.is_ok() {
            OUTCOME_SUCCESS
        } else {
            OUTCOME_FAILURE
        };
        self.operations
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn observe_attach(&self, seconds: f64) {
        self.attach_duration.observe(seconds);
    }

    /// Current value of an operation counter
    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome])
            .get()
    }

    pub fn attach_samples(&self) -> u64 {
        self.attach_duration.get_sample_count()
    }

    /// Text exposition format content type
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Encode all metrics in the text exposition format
    pub fn render(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

// =============================================================================
// Instrumented Driver
// =============================================================================

/// Driver wrapper recording operation metrics
pub struct InstrumentedDriver {
    inner: StorageDriverRef,
    metrics: Arc<DriverMetrics>,
}

impl InstrumentedDriver {
    pub fn new(inner: StorageDriverRef, metrics: Arc<DriverMetrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl StorageDriver for InstrumentedDriver {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    fn storage_type(&self) -> StorageType {
        self.inner.storage_type()
    }

    async fn instance_inspect(&self, instance_id: &InstanceId) -> Result<Instance> {
        self.inner.instance_inspect(instance_id).await
    }

    async fn volumes(&self, opts: VolumesOpts) -> Result<Vec<Volume>> {
        self.inner.volumes(opts).await
    }

    async fn volume_inspect(&self, volume_id: &str, opts: VolumeInspectOpts) -> Result<Volume> {
        self.inner.volume_inspect(volume_id, opts).await
    }

    async fn volume_create(&self, name: &str, opts: VolumeCreateOpts) -> Result<Volume> {
        let result = self.inner.volume_create(name, opts).await;
        self.metrics.record("create", &result);
        result
    }

    async fn volume_create_from_snapshot(
        &self,
        snapshot_id: &str,
        name: &str,
        opts: VolumeCreateOpts,
    ) -> Result<Volume> {
        self.inner
            .volume_create_from_snapshot(snapshot_id, name, opts)
            .await
    }

    async fn volume_copy(&self, volume_id: &str, name: &str) -> Result<Volume> {
        self.inner.volume_copy(volume_id, name).await
    }

    async fn volume_snapshot(&self, volume_id: &str, snapshot_name: &str) -> Result<Snapshot> {
        self.inner.volume_snapshot(volume_id, snapshot_name).await
    }

    async fn volume_remove(&self, volume_id: &str) -> Result<()> {
        let result = self.inner.volume_remove(volume_id).await;
        self.metrics.record("remove", &result);
        result
    }

    async fn volume_attach(
        &self,
        volume_id: &str,
        opts: VolumeAttachOpts,
    ) -> Result<(Volume, String)> {
        let start = Instant::now();
        let result = self.inner.volume_attach(volume_id, opts).await;
        self.metrics.observe_attach(start.elapsed().as_secs_f64());
        self.metrics.record("attach", &result);
        result
    }

    async fn volume_detach(&self, volume_id: &str, opts: VolumeDetachOpts) -> Result<Volume> {
        let result = self.inner.volume_detach(volume_id, opts).await;
        self.metrics.record("detach", &result);
        result
    }

    async fn volume_detach_all(&self, volume_id: &str) -> Result<()> {
        self.inner.volume_detach_all(volume_id).await
    }

    async fn next_device_info(&self) -> Result<NextDeviceInfo> {
        self.inner.next_device_info().await
    }

    async fn snapshots(&self) -> Result<Vec<Snapshot>> {
        self.inner.snapshots().await
    }

    async fn snapshot_inspect(&self, snapshot_id: &str) -> Result<Snapshot> {
        self.inner.snapshot_inspect(snapshot_id).await
    }

    async fn snapshot_copy(
        &self,
        snapshot_id: &str,
        snapshot_name: &str,
        destination_id: &str,
    ) -> Result<Snapshot> {
        self.inner
            .snapshot_copy(snapshot_id, snapshot_name, destination_id)
            .await
    }

    async fn snapshot_remove(&self, snapshot_id: &str) -> Result<()> {
        self.inner.snapshot_remove(snapshot_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::InMemoryArray;
    use crate::config::DriverConfig;
    use crate::driver::VmaxDriver;

    const SYMM: &str = "000197900123";

    fn instrumented() -> (InstrumentedDriver, Arc<DriverMetrics>) {
        let mut config = DriverConfig::new("https://u4p.lab.local", SYMM);
        config.port_group = Some("libStorage_PG".into());
        let array = InMemoryArray::new(SYMM).with_port_group("libStorage_PG");
        let inner: StorageDriverRef = Arc::new(VmaxDriver::new(config, Arc::new(array)));
        let metrics = Arc::new(DriverMetrics::new().unwrap());
        (InstrumentedDriver::new(inner, metrics.clone()), metrics)
    }

    #[tokio::test]
    async fn test_operations_are_counted() {
        let (driver, metrics) = instrumented();
        let volume = driver
            .volume_create(
                "data01",
                VolumeCreateOpts {
                    size: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let iid = InstanceId::new("iqn.1994-05.com.redhat:node1", "vmax");
        driver
            .volume_attach(
                &volume.id,
                VolumeAttachOpts {
                    instance_id: iid.clone(),
                    force: false,
                },
            )
            .await
            .unwrap();
        driver
            .volume_detach(
                &volume.id,
                VolumeDetachOpts {
                    instance_id: iid,
                    force: false,
                },
            )
            .await
            .unwrap();
        driver.volume_remove(&volume.id).await.unwrap();
        assert!(driver.volume_remove(&volume.id).await.is_err());

        assert_eq!(metrics.operation_count("create", OUTCOME_SUCCESS), 1);
        assert_eq!(metrics.operation_count("attach", OUTCOME_SUCCESS), 1);
        assert_eq!(metrics.operation_count("detach", OUTCOME_SUCCESS), 1);
        assert_eq!(metrics.operation_count("remove", OUTCOME_SUCCESS), 1);
        assert_eq!(metrics.operation_count("remove", OUTCOME_FAILURE), 1);
        assert_eq!(metrics.attach_samples(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_counts_failure() {
        let (driver, metrics) = instrumented();
        assert!(driver
            .volume_create("data01", VolumeCreateOpts::default())
            .await
            .is_err());
        assert_eq!(metrics.operation_count("create", OUTCOME_FAILURE), 1);
        assert_eq!(metrics.operation_count("create", OUTCOME_SUCCESS), 0);
    }

    #[test]
    fn test_render_text_format() {
        let metrics = DriverMetrics::new().unwrap();
        metrics.record::<()>("attach", &Ok(()));
        let text = String::from_utf8(metrics.render().unwrap()).unwrap();
        assert!(text.contains(
            "vmax_driver_operations_total{operation=\"attach\",outcome=\"success\"} 1"
        ));
        assert!(text.contains("vmax_driver_attach_duration_seconds"));
        assert!(metrics.content_type().starts_with("text/plain"));
    }
}
