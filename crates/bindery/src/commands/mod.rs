//! Command handlers.

pub mod check;
pub mod poll;
pub mod run;

use bindery_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Load the explicit `--config` file, or the platform default.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(bindery_config::config_path);
    Ok(bindery_config::load_config_from(&path)?)
}

/// Human-readable poll interval.
pub fn describe_interval(secs: i64) -> String {
    match u64::try_from(secs) {
        Ok(0) => "once".into(),
        Ok(secs) => format!(
            "every {}",
            humantime::format_duration(std::time::Duration::from_secs(secs))
        ),
        Err(_) => format!("{secs}s (invalid)"),
    }
}
