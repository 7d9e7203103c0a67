//! Flat `key=value` configuration file (spec §6), grounded on the
//! teacher's `settings.rs`/`utils.rs` use of the `config` crate.

use std::path::Path;

use config::FileFormat;
use log::LevelFilter;
use serde_derive::Deserialize;

use crate::constants::{DEFAULT_DNS_REFRESH_INTERVAL, DEFAULT_DS_HEALTHCHECK_INTERVAL, DEFAULT_LOG_LEVEL};

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub data_port: u16,
    pub downstream: String,
    pub downstream_flush_interval: f64,
    #[serde(default = "default_dns_refresh_interval")]
    pub dns_refresh_interval: u64,
    #[serde(default = "default_health_check_interval")]
    pub downstream_health_check_interval: f64,
    #[serde(default = "default_log_level")]
    pub log_level: u8,
}

fn default_dns_refresh_interval() -> u64 {
    DEFAULT_DNS_REFRESH_INTERVAL
}

fn default_health_check_interval() -> f64 {
    DEFAULT_DS_HEALTHCHECK_INTERVAL
}

fn default_log_level() -> u8 {
    DEFAULT_LOG_LEVEL
}

impl Settings {
    /// Loads and validates the config file named on the CLI. `#`-prefixed
    /// and blank lines are comments, same as the source's hand-rolled
    /// parser; unknown keys or a missing required key are fatal.
    pub fn load(path: &Path) -> Result<Self, String> {
        let mut raw = config::Config::new();
        raw.merge(config::File::from(path.to_path_buf()).format(FileFormat::Ini))
            .map_err(|e| format!("failed to read config file {:?}: {}", path, e))?;
        raw.try_into().map_err(|e| format!("invalid config file {:?}: {}", path, e))
    }
}

/// Maps the source's numeric log levels (TRACE=0 .. ERROR=4) onto
/// `log::LevelFilter`.
pub fn level_filter(log_level: u8) -> LevelFilter {
    match log_level {
        0 => LevelFilter::Trace,
        1 => LevelFilter::Debug,
        2 => LevelFilter::Info,
        3 => LevelFilter::Warn,
        _ => LevelFilter::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn log_level_mapping_matches_source_numbering() {
        assert_eq!(level_filter(0), LevelFilter::Trace);
        assert_eq!(level_filter(2), LevelFilter::Info);
        assert_eq!(level_filter(4), LevelFilter::Error);
        assert_eq!(level_filter(99), LevelFilter::Error);
    }
}
