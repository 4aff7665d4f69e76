//! `bindery run`: poll every configured device until Ctrl-C.

use std::sync::Arc;

use tracing::{info, warn};

use bindery_config::Config;
use bindery_core::{Engine, TracingSink};

use super::describe_interval;
use crate::error::CliError;

pub async fn handle(config: &Config) -> Result<(), CliError> {
    let engine = Engine::new(config.schema_registry(), Arc::new(TracingSink));

    for bridge in config.bridge_configs()? {
        engine.register_bridge(&bridge)?;
    }

    let mut started = 0usize;
    for device in config.device_configs()? {
        let id = device.identity.device.clone();
        let schedule = describe_interval(device.interval_secs);
        // a bad device is reported as ConfigError; the rest keep polling
        match engine.initialize_device(device) {
            Ok(()) => {
                info!(device = %id, schedule = %schedule, "polling");
                started += 1;
            }
            Err(e) => warn!(device = %id, error = %e, "device not started"),
        }
    }
    info!(
        started,
        configured = config.devices.len(),
        "engine running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;

    for id in engine.devices() {
        if let Some(health) = engine.status(&id) {
            info!(
                device = %id,
                status = %health.status,
                failures = health.consecutive_failures,
                "final status"
            );
        }
    }
    engine.shutdown().await;
    Ok(())
}
