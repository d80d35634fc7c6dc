//! VMAX Storage Driver
//!
//! Serves the volume driver over REST, or runs the host-side executor
//! commands that report the local initiator and attached devices.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmax_storage_driver::{
    standalone_constructor, unisphere_constructor, ApiServer, ApiServerConfig, ConfigStore,
    DriverMetrics, DriverRegistry, Error, ExecutorConfig, IdentityScheme, InstrumentedDriver,
    Result, StorageDriverRef, StorageExecutor, VmaxExecutor, DRIVER_NAME,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// VMAX volume driver and host executor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Driver configuration file (YAML)
    #[arg(long, env = "VMAX_CONFIG")]
    config: Option<PathBuf>,

    /// Storage driver to load
    #[arg(long, env = "STORAGE_DRIVER", default_value = DRIVER_NAME)]
    driver: String,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run against a simulated in-memory array
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// iSCSI initiator name file
    #[arg(long, env = "ISCSI_INITIATOR_FILE", default_value = "/etc/iscsi/initiatorname.iscsi")]
    initiator_file: PathBuf,

    /// Identify the host by interface MAC address instead of initiator name
    #[arg(long, env = "VMAX_MAC_IDENTITY")]
    mac_identity: bool,

    /// Interface used for MAC identity
    #[arg(long, env = "VMAX_INTERFACE", default_value = "eth0")]
    interface: String,

    /// Directory of by-id device links
    #[arg(long, env = "DISK_BY_ID_PATH", default_value = "/dev/disk/by-id")]
    disk_by_id_path: PathBuf,

    /// Match device-mapper/multipath links
    #[arg(long, env = "VMAX_DEVICE_MAPPER")]
    device_mapper: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Serve the REST API (default)
    Serve,
    /// Print the local instance identity
    InstanceId,
    /// Print local devices keyed by WWN
    LocalDevices,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&args).await,
        Command::InstanceId => {
            let iid = executor(&args).instance_id().await?;
            println!("{}", serde_json::to_string_pretty(&iid)?);
            Ok(())
        }
        Command::LocalDevices => {
            let devices = executor(&args).local_devices().await?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(())
        }
    }
}

async fn serve(args: &Args) -> Result<()> {
    info!("Starting VMAX storage driver");
    info!("  Version: {}", vmax_storage_driver::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Standalone mode: {}", args.standalone);

    let mut store = match &args.config {
        Some(path) => ConfigStore::from_file(path)?,
        None => ConfigStore::new(),
    };
    store.apply_env(std::env::vars());

    let mut registry = DriverRegistry::new();
    if args.standalone {
        registry.register(DRIVER_NAME, standalone_constructor());
    } else {
        registry.register(DRIVER_NAME, unisphere_constructor());
    }

    let metrics = Arc::new(DriverMetrics::new()?);
    let driver: StorageDriverRef = Arc::new(InstrumentedDriver::new(
        registry.create(&args.driver, &store)?,
        metrics.clone(),
    ));
    driver.init().await?;
    info!("  Metrics: http://{}/metrics", args.api_addr);

    let api_config = ApiServerConfig {
        rest_addr: args.api_addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid REST API address: {}", e))
        })?,
    };
    let api_server = Arc::new(ApiServer::new(api_config, driver, metrics));

    let shutdown = api_server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt, shutting down");
                let _ = shutdown.send(());
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    api_server.run().await?;

    info!("Driver shutdown complete");
    Ok(())
}

fn executor(args: &Args) -> VmaxExecutor {
    VmaxExecutor::new(ExecutorConfig {
        scheme: if args.mac_identity {
            IdentityScheme::Mac
        } else {
            IdentityScheme::Iscsi
        },
        initiator_file: args.initiator_file.clone(),
        interface: args.interface.clone(),
        disk_by_id_path: args.disk_by_id_path.clone(),
        device_mapper: args.device_mapper,
        ..Default::default()
    })
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "tower_http=info", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Executor commands print JSON on stdout
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
