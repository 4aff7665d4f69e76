//! `bindery poll`: one fetch, printed as JSON.

use std::sync::Arc;

use bindery_config::Config;
use bindery_core::{Engine, TracingSink};

use crate::cli::PollArgs;
use crate::error::CliError;

pub async fn handle(config: &Config, args: &PollArgs) -> Result<(), CliError> {
    let section = config
        .find_device(&args.device)
        .ok_or_else(|| CliError::UnknownDevice {
            device: args.device.clone(),
            available: config
                .devices
                .iter()
                .map(|d| d.id.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })?;

    let device = config.device_config(section)?;
    let bridge = config.bridge_config(&section.bridge)?;

    let engine = Engine::new(config.schema_registry(), Arc::new(TracingSink));
    engine.register_bridge(&bridge)?;
    let snapshot = engine.poll_once(&device).await?;

    let json = if args.compact {
        serde_json::to_string(&snapshot)?
    } else {
        serde_json::to_string_pretty(&snapshot)?
    };
    println!("{json}");
    Ok(())
}
