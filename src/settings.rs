//!
//! Settings for relish, loaded from relish.yml and overlaid with `RELISH_` environment variables
//!

use serde::Deserialize;
use tracing::log::*;

use std::time::Duration;

use crate::errors::RelishError;
use crate::sink::table::TableDefaults;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub global: Global,
}

#[derive(Debug, Deserialize)]
pub struct Global {
    pub listen: Listen,
    pub metrics: Metrics,
    #[serde(default)]
    pub table: TableDefaults,
    #[serde(default)]
    pub timeouts: Timeouts,
}

#[derive(Debug, Deserialize)]
pub struct Listen {
    pub address: String,
    pub port: u64,
}

#[derive(Debug, Deserialize)]
pub struct Metrics {
    pub statsd: String,
}

/// Upper bounds on the blocking parts of handling a webhook
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Timeouts {
    #[serde(default = "construct_ms_default")]
    pub construct_ms: u64,
    #[serde(default = "write_ms_default")]
    pub write_ms: u64,
}

impl Timeouts {
    pub fn construct(&self) -> Duration {
        Duration::from_millis(self.construct_ms)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            construct_ms: construct_ms_default(),
            write_ms: write_ms_default(),
        }
    }
}

fn construct_ms_default() -> u64 {
    30_000
}

fn write_ms_default() -> u64 {
    30_000
}

/// Load the settings from the given file, environment variables like
/// `RELISH_GLOBAL__LISTEN__PORT` override what the file says
pub fn load(file: &str) -> Result<Settings, RelishError> {
    debug!("Loading settings from {file}");
    let mut conf = config::Config::default();
    conf.merge(config::File::with_name(file))?;
    conf.merge(config::Environment::with_prefix("RELISH").separator("__"))?;
    Ok(conf.try_into()?)
}
