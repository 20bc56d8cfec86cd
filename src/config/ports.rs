use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Port set handed to the cluster engine.
///
/// Several nodes can share one host by shifting every port with
/// [`PortConfig::apply_index`].
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    /// DNS query interface
    #[serde(default = "default_dns_port")]
    pub dns: u16,

    /// HTTP API
    #[serde(default = "default_http_port")]
    pub http: u16,

    /// HTTPS API
    #[serde(default = "default_https_port")]
    pub https: u16,

    /// CLI RPC
    #[serde(default = "default_rpc_port")]
    pub rpc: u16,

    /// LAN gossip (client + server)
    #[serde(default = "default_serf_lan_port")]
    pub serf_lan: u16,

    /// WAN gossip (server only)
    #[serde(default = "default_serf_wan_port")]
    pub serf_wan: u16,

    /// Server internal RPC
    #[serde(default = "default_server_port")]
    pub server: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            dns: default_dns_port(),
            http: default_http_port(),
            https: default_https_port(),
            rpc: default_rpc_port(),
            serf_lan: default_serf_lan_port(),
            serf_wan: default_serf_wan_port(),
            server: default_server_port(),
        }
    }
}

impl PortConfig {
    /// Shifts every port by `index`.
    ///
    /// Either all ports move or none do: if any port would leave the 16-bit
    /// range the set is left untouched and `Error::InvalidConfig` is returned.
    pub fn apply_index(
        &mut self,
        index: u16,
    ) -> Result<()> {
        let shift = |port: u16, name: &str| {
            port.checked_add(index).ok_or_else(|| {
                Error::InvalidConfig(format!("{name} port {port} + {index} exceeds 65535"))
            })
        };

        let shifted = Self {
            dns: shift(self.dns, "dns")?,
            http: shift(self.http, "http")?,
            https: shift(self.https, "https")?,
            rpc: shift(self.rpc, "rpc")?,
            serf_lan: shift(self.serf_lan, "serf_lan")?,
            serf_wan: shift(self.serf_wan, "serf_wan")?,
            server: shift(self.server, "server")?,
        };
        *self = shifted;
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let ports = [
            ("dns", self.dns),
            ("http", self.http),
            ("https", self.https),
            ("rpc", self.rpc),
            ("serf_lan", self.serf_lan),
            ("serf_wan", self.serf_wan),
            ("server", self.server),
        ];

        let mut seen = std::collections::HashMap::new();
        for (name, port) in ports {
            if port == 0 {
                return Err(Error::InvalidConfig(format!("{name} port cannot be 0")));
            }
            if let Some(other) = seen.insert(port, name) {
                return Err(Error::InvalidConfig(format!(
                    "{name} and {other} ports both use {port}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for PortConfig {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "dns: {}, http: {}, https: {}, rpc: {}, serf_lan: {}, serf_wan: {}, server: {}",
            self.dns, self.http, self.https, self.rpc, self.serf_lan, self.serf_wan, self.server
        )
    }
}

fn default_dns_port() -> u16 {
    8600
}
fn default_http_port() -> u16 {
    8500
}
fn default_https_port() -> u16 {
    8501
}
fn default_rpc_port() -> u16 {
    8400
}
fn default_serf_lan_port() -> u16 {
    8301
}
fn default_serf_wan_port() -> u16 {
    8302
}
fn default_server_port() -> u16 {
    8300
}
