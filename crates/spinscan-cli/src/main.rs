//! `spinscan` – the point cloud fusion node.
//!
//! Startup:
//!
//! 1. Initialise structured logging (`RUST_LOG`, `SPINSCAN_LOG_FORMAT=json`,
//!    optional OTLP export).
//! 2. Load `~/.spinscan/config.toml` (or `$SPINSCAN_CONFIG`), apply
//!    `SPINSCAN_*` overrides and validate.  Any failure exits non-zero.
//! 3. Spawn the [`FusionNode`] on the event bus and connect the rosbridge
//!    client, which runs until the connection drops or Ctrl-C is pressed.

mod config;

use std::process::ExitCode;

use tokio::sync::watch;
use tracing::{error, info, warn};

use spinscan_middleware::{EventBus, RosbridgeClient};
use spinscan_perception::TransformListener;
use spinscan_runtime::FusionNode;
use spinscan_types::SpinError;

fn main() -> ExitCode {
    let _otel_guard = spinscan_runtime::telemetry::init_tracing("spinscan");

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %config::config_path().display(), error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        rosbridge = %cfg.rosbridge_url,
        world_frame = %cfg.world_frame,
        devices = cfg.devices.len(),
        max_z = cfg.max_z,
        max_radius = cfg.max_radius,
        "configuration loaded"
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fusion node stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: config::Config) -> Result<(), SpinError> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the node can only be stopped by killing it");
    }

    let bus = EventBus::default();
    let tf = TransformListener::new(cfg.tf_cache_secs);
    let node = FusionNode::new(
        bus.clone(),
        cfg.fusion_settings(),
        cfg.device_configs(),
        tf,
    );
    let _tasks = node.spawn();

    // A dropped sender means no handler was installed; wait forever then.
    let shutdown = async move {
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let client = RosbridgeClient::new(cfg.rosbridge_url.clone(), bus, cfg.routes());
    tokio::select! {
        result = client.run() => result,
        _ = shutdown => {
            info!("Ctrl-C received, shutting down");
            Ok(())
        }
    }
}
