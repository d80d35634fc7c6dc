//! API Server
//!
//! Serves the REST API for a single storage driver.

use crate::domain::ports::StorageDriverRef;
use crate::error::{Error, Result};
use crate::metrics::DriverMetrics;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

use super::rest::RestRouter;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8090)),
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

pub struct ApiServer {
    config: ApiServerConfig,
    driver: StorageDriverRef,
    metrics: Arc<DriverMetrics>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(
        config: ApiServerConfig,
        driver: StorageDriverRef,
        metrics: Arc<DriverMetrics>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            driver,
            metrics,
            shutdown_tx,
        }
    }

    /// Run until shutdown is triggered or the listener fails
    pub async fn run(&self) -> Result<()> {
        info!(
            driver = %self.driver.name(),
            "REST API: {}",
            self.config.rest_addr
        );

        let rest_handle = self.spawn_rest_server();
        match rest_handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("REST server task failed: {:?}", e);
                Err(Error::Internal(format!("REST server task failed: {}", e)))
            }
        }
    }

    fn spawn_rest_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let addr = self.config.rest_addr;
        let driver = self.driver.clone();
        let metrics = self.metrics.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move { run_rest_server(addr, driver, metrics, shutdown_rx).await })
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Handle for triggering shutdown from another task
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}

async fn run_rest_server(
    addr: SocketAddr,
    driver: StorageDriverRef,
    metrics: Arc<DriverMetrics>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let app = RestRouter::new(driver, metrics).build();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;

    info!("REST API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("REST server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::InMemoryArray;
    use crate::config::DriverConfig;
    use crate::driver::VmaxDriver;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = ApiServerConfig::default();
        assert_eq!(config.rest_addr.port(), 8090);
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let config = DriverConfig::new("https://u4p.lab.local", "000197900123");
        let driver: StorageDriverRef = Arc::new(VmaxDriver::new(
            config,
            Arc::new(InMemoryArray::new("000197900123")),
        ));
        let server = Arc::new(ApiServer::new(
            ApiServerConfig {
                rest_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            },
            driver,
            Arc::new(DriverMetrics::new().unwrap()),
        ));

        let shutdown = server.shutdown_handle();
        let running = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        // Resend until the server task has subscribed and consumed the signal
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let _ = shutdown.send(());
                if running.is_finished() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(result.is_ok());
    }
}
