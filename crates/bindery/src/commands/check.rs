//! `bindery check`: validate and summarize.

use bindery_config::{AuthMode, Config};

use super::describe_interval;
use crate::error::CliError;

pub fn handle(config: &Config) -> Result<(), CliError> {
    config.validate()?;

    println!("bridges ({}):", config.bridges.len());
    for (name, bridge) in &config.bridges {
        let auth = match bridge.auth {
            AuthMode::OAuth => "oauth",
            AuthMode::Basic => "basic",
            AuthMode::Bearer => "bearer",
        };
        println!("  {name:<16} {auth:<7} {}", bridge.base_url);
    }

    println!("devices ({}):", config.devices.len());
    for device in config.device_configs()? {
        let identity = &device.identity;
        println!(
            "  {:<16} {:<16} {:<18} {}",
            identity.device.as_str(),
            identity.bridge.as_str(),
            identity.device_type.as_str(),
            describe_interval(device.interval_secs),
        );
    }

    if !config.device_types.is_empty() {
        let names: Vec<&str> = config.device_types.keys().map(String::as_str).collect();
        println!("custom device types: {}", names.join(", "));
    }
    println!("configuration OK");
    Ok(())
}
