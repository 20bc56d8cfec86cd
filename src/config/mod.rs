//! Configuration management for an embedded coordination store node.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file named by `CONFIG_PATH`
//! - Environment variable overrides (`DSTORE__` prefix, highest priority)
//! - Component-wise validation
mod ports;
mod retry;
mod watch;
pub use ports::*;
pub use retry::*;
pub use watch::*;


use std::env;
use std::fmt::Debug;
use std::path::PathBuf;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::utils::net::is_endpoint;
use crate::Error;
use crate::Result;

pub(crate) const ENV_PREFIX: &str = "DSTORE";

/// Verbosity requested by the embedder.
///
/// `None` routes the engine's own output to a discard sink; any other level
/// inherits the process error stream.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[default]
    None,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Stripped down configuration of a cluster node, translated into the
/// engine's full configuration when the store is built.
#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// Serve the engine's HTTP API
    pub enable_http: bool,
    /// Serve the engine's DNS interface
    pub enable_dns: bool,
    /// Expose the engine's debug endpoints
    pub enable_debug: bool,
    /// Whether this node bootstraps a new cluster
    pub bootstrap: bool,
    /// Seed members (`host:port` LAN gossip endpoints) to join on start
    pub members: Vec<String>,
    /// Node name; the engine picks one when empty
    pub node_name: String,
    pub log_level: LogLevel,
    /// Gossip encryption key, passed through untouched
    pub encrypt_key: Option<String>,
    pub datacenter: String,
    pub data_dir: PathBuf,
    /// Address the client API listens on
    pub client_address: String,
    /// Address the gossip and RPC layers bind to
    pub bind_address: String,
    /// Address advertised to peers, defaults to the bind address
    pub bind_advertised: Option<String>,
    pub ports: PortConfig,
    pub watch: WatchConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enable_http: true,
            enable_dns: false,
            enable_debug: false,
            bootstrap: false,
            members: vec![],
            node_name: String::new(),
            log_level: LogLevel::default(),
            encrypt_key: None,
            datacenter: "dc1".into(),
            data_dir: PathBuf::from("/tmp/distro-store/data"),
            client_address: "0.0.0.0".into(),
            bind_address: "0.0.0.0".into(),
            bind_advertised: None,
            ports: PortConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Debug for StoreConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("node_name", &self.node_name)
            .field("datacenter", &self.datacenter)
            .field("bootstrap", &self.bootstrap)
            .field("members", &self.members)
            .field("bind_address", &self.bind_address)
            .field("ports", &self.ports)
            .field("encrypt_key", &self.encrypt_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl StoreConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Sources are merged in order (later sources override earlier):
    /// 1. Type defaults
    /// 2. Configuration file from `CONFIG_PATH` (if set)
    /// 3. Environment variables with `DSTORE__` prefix
    ///
    /// Callers MUST call [`validate()`](Self::validate) before using the result.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("DSTORE__PORTS__HTTP", "9500");
    /// let cfg = StoreConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        let config: Self = builder.add_source(environment()).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order: current values, the new file, then the environment.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns the validated instance.
    ///
    /// # Errors
    /// `Error::InvalidConfig` when:
    /// - datacenter or data directory is empty
    /// - a seed member is not a `host:port` endpoint
    /// - two ports collide or one is zero
    /// - watch timings or backoff bounds are unusable
    pub fn validate(self) -> Result<Self> {
        if self.datacenter.trim().is_empty() {
            return Err(Error::InvalidConfig("datacenter cannot be empty".into()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("data_dir path cannot be empty".into()));
        }
        if self.bind_address.trim().is_empty() {
            return Err(Error::InvalidConfig("bind_address cannot be empty".into()));
        }
        if let Some(member) = self.members.iter().find(|m| !is_endpoint(m)) {
            return Err(Error::InvalidConfig(format!(
                "member {member:?} is not a host:port endpoint"
            )));
        }
        self.ports.validate()?;
        self.watch.validate()?;
        Ok(self)
    }

    /// Address peers should use to reach this node.
    pub fn advertised_address(&self) -> &str {
        self.bind_advertised
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(&self.bind_address)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
