use super::ClientConfig;
use super::EngineConfig;
use crate::utils::net::client_endpoint;
use crate::Error;
use crate::LogLevel;
use crate::StoreConfig;

impl TryFrom<&StoreConfig> for EngineConfig {
    type Error = Error;

    /// Translates the embedder's configuration into the engine's.
    ///
    /// The node always runs in server mode with TLS verification off, and the
    /// engine's own log level is pinned to `None`.
    fn try_from(cfg: &StoreConfig) -> Result<Self, Self::Error> {
        let cfg = cfg.clone().validate()?;

        Ok(EngineConfig {
            server: true,
            bootstrap: cfg.bootstrap,
            data_dir: cfg.data_dir,
            node_name: cfg.node_name,
            datacenter: cfg.datacenter,
            encrypt_key: cfg.encrypt_key,
            enable_debug: cfg.enable_debug,
            log_level: LogLevel::None,
            verify_incoming: false,
            verify_outgoing: false,
            bind_addr: cfg.bind_address,
            advertise_addr: cfg.bind_advertised,
            client_addr: cfg.client_address,
            ports: cfg.ports,
            start_join: cfg.members,
        })
    }
}

impl From<&EngineConfig> for ClientConfig {
    fn from(cfg: &EngineConfig) -> Self {
        ClientConfig {
            address: client_endpoint(&cfg.client_addr, cfg.ports.http),
            datacenter: cfg.datacenter.clone(),
        }
    }
}
