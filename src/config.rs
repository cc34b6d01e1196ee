//! Relay configuration.
//!
//! Loaded in three tiers, later ones winning:
//! 1. TOML file (`relay.toml`, or `RELAY_CONFIG_PATH`, or an explicit path)
//! 2. Environment variables
//! 3. CLI arguments, applied by the binary

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::datatypes::{FEED_CAP, RETENTION_DAYS};
use crate::error::{RelayError, RelayResult};

pub const CONFIG_FILE_NAME: &str = "relay.toml";
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Shared feed document. `None` keeps the feed in local storage only.
    pub endpoint: Option<String>,
    /// Directory of the local store (identity and feed cache).
    pub data_dir: PathBuf,
    /// Seconds between polls; 0 fetches once at start.
    pub poll_interval_secs: u64,
    pub retention_days: u32,
    pub feed_cap: usize,
    pub request_timeout_secs: u64,
    /// Upper-case handles set by the user.
    pub normalize_handles: bool,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            data_dir: PathBuf::from(".relay"),
            poll_interval_secs: 10,
            retention_days: RETENTION_DAYS,
            feed_cap: FEED_CAP,
            request_timeout_secs: 10,
            normalize_handles: true,
            log_level: "info".to_owned(),
        }
    }
}

impl RelayConfig {
    /// Loads the file (if any), applies environment overrides and validates.
    ///
    /// An explicit `path` or one named by `RELAY_CONFIG_PATH` must exist;
    /// a missing `./relay.toml` just means defaults.
    pub fn load(path: Option<&Path>) -> RelayResult<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let local = PathBuf::from(CONFIG_FILE_NAME);
                if local.exists() {
                    Self::from_file(&local)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_environment_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> RelayResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> RelayResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Supported variables:
    /// - `RELAY_ENDPOINT` -> `endpoint` (empty string clears it)
    /// - `RELAY_DATA_DIR` -> `data_dir`
    /// - `RELAY_POLL_INTERVAL_SECS` -> `poll_interval_secs`
    /// - `RELAY_LOG_LEVEL` -> `log_level`
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides_from(|name| env::var(name).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("RELAY_ENDPOINT") {
            self.endpoint = Some(value).filter(|v| !v.trim().is_empty());
        }
        if let Some(value) = lookup("RELAY_DATA_DIR") {
            self.data_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("RELAY_POLL_INTERVAL_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                self.poll_interval_secs = secs;
            }
        }
        if let Some(value) = lookup("RELAY_LOG_LEVEL") {
            self.log_level = value;
        }
    }

    pub fn validate(&self) -> RelayResult<()> {
        if self.feed_cap == 0 {
            return Err(RelayError::Config("feed_cap must be at least 1".to_owned()));
        }
        if self.retention_days == 0 {
            return Err(RelayError::Config("retention_days must be at least 1".to_owned()));
        }
        if self.request_timeout_secs == 0 {
            return Err(RelayError::Config("request_timeout_secs must be at least 1".to_owned()));
        }
        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(RelayError::Config(format!(
                    "endpoint must be an http(s) URL, got '{endpoint}'"
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
