use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Settings of the background change-watch loop
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Run the watch loop at all. Default: true
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Root of the watched key namespace. Default: "/"
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Upper bound of one blocking list query. Default: 120s
    #[serde(default = "default_wait_time_ms")]
    pub wait_time_ms: u64,

    /// How often the LAN roster is diffed for node events. Default: 1s
    #[serde(default = "default_membership_interval_ms")]
    pub membership_interval_ms: u64,

    /// Delay policy applied after a failed query
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            prefix: default_prefix(),
            wait_time_ms: default_wait_time_ms(),
            membership_interval_ms: default_membership_interval_ms(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl WatchConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    pub fn membership_interval(&self) -> Duration {
        Duration::from_millis(self.membership_interval_ms)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.wait_time_ms == 0 {
            return Err(Error::InvalidConfig(
                "watch wait_time_ms must be greater than 0".into(),
            ));
        }
        if self.membership_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "watch membership_interval_ms must be greater than 0".into(),
            ));
        }
        self.backoff.validate()
    }
}

fn default_enabled() -> bool {
    true
}
fn default_prefix() -> String {
    "/".into()
}
fn default_wait_time_ms() -> u64 {
    120_000
}
fn default_membership_interval_ms() -> u64 {
    1_000
}
