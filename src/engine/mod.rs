//! This module is the boundary to the embedded cluster engine.
//!
//! Gossip, leader election, the consensus log and the wire protocol all live
//! behind these traits. The store only needs agent lifecycle, a consistent
//! key/value API with monotonically increasing change indices, and the LAN
//! roster. [`memory`] provides an in-process implementation of the contract.
pub mod memory;
mod translate;

pub use translate::*;


use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::LogLevel;
use crate::PortConfig;

/// Full configuration consumed by the engine when creating an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub server: bool,
    pub bootstrap: bool,
    pub data_dir: PathBuf,
    pub node_name: String,
    pub datacenter: String,
    pub encrypt_key: Option<String>,
    pub enable_debug: bool,
    /// Engine's own verbosity; the store's log sink governs what is visible
    pub log_level: LogLevel,
    pub verify_incoming: bool,
    pub verify_outgoing: bool,
    pub bind_addr: String,
    pub advertise_addr: Option<String>,
    pub client_addr: String,
    pub ports: PortConfig,
    /// Members the engine may join on its own during startup
    pub start_join: Vec<String>,
}

/// Where the client handle connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// `host:port` of the local HTTP API
    pub address: String,
    pub datacenter: String,
}

/// Destination of the engine's own log output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSink {
    Discard,
    Stderr,
}

impl LogSink {
    pub fn for_level(level: LogLevel) -> Self {
        match level {
            LogLevel::None => LogSink::Discard,
            _ => LogSink::Stderr,
        }
    }

    /// Writes one line of engine output
    pub fn emit(
        &self,
        line: &str,
    ) {
        if let LogSink::Stderr = self {
            let _ = writeln!(std::io::stderr().lock(), "{line}");
        }
    }
}

/// One entry of the LAN roster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub addr: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    /// Index of the write that created the key
    pub create_index: u64,
    /// Index of the last write to the key
    pub modify_index: u64,
}

impl KvPair {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

/// Blocking-query parameters. A zero `wait_index` never blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    pub wait_index: u64,
    pub wait_time: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryMeta {
    /// Raft index of the last change visible to the query
    pub last_index: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Another agent already holds the endpoint
    #[error("Address already in use: {0}")]
    AddressInUse(String),

    /// Nothing answers at the endpoint
    #[error("No agent reachable at {0}")]
    Unreachable(String),

    /// None of the requested members could be joined
    #[error("Failed to join any of {0:?}")]
    JoinFailed(Vec<String>),

    /// Writes and consistent reads need an elected leader
    #[error("No cluster leader")]
    NoLeader,

    /// Client and agent disagree on the datacenter
    #[error("Unknown datacenter {0}")]
    UnknownDatacenter(String),

    /// The agent was shut down
    #[error("Agent is shut down")]
    Shutdown,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Agent lifecycle and roster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterAgent: Send + Sync + 'static {
    /// Joins the LAN pool through the given members, returning how many were reached
    async fn join_lan(
        &self,
        addrs: &[String],
    ) -> Result<usize, EngineError>;

    /// Gracefully leaves the cluster
    async fn leave(&self) -> Result<(), EngineError>;

    /// Releases every resource held by the agent
    async fn shutdown(&self) -> Result<(), EngineError>;

    /// Begins the agent's background synchronization with the catalog
    fn start_sync(&self);

    /// Current LAN roster, including the agent itself
    fn lan_members(&self) -> Vec<Member>;
}

/// Consistent key/value API of a client handle
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    async fn get(
        &self,
        key: &str,
        opts: QueryOptions,
    ) -> Result<(Option<KvPair>, QueryMeta), EngineError>;

    async fn put(
        &self,
        pair: KvPair,
    ) -> Result<(), EngineError>;

    async fn delete(
        &self,
        key: &str,
    ) -> Result<(), EngineError>;

    /// Lists every pair under `prefix`.
    ///
    /// With a non-zero `wait_index` the call blocks until the store index moves
    /// past it or `wait_time` elapses, whichever comes first.
    async fn list(
        &self,
        prefix: &str,
        opts: QueryOptions,
    ) -> Result<(Vec<KvPair>, QueryMeta), EngineError>;
}

/// A running HTTP front-end of the engine
#[cfg_attr(test, automock)]
pub trait FrontEnd: Send + Sync + 'static {
    fn address(&self) -> SocketAddr;

    fn shutdown(&self);
}

/// Factory for agents, clients and front-ends
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    async fn create_agent(
        &self,
        config: &EngineConfig,
        sink: LogSink,
    ) -> Result<Arc<dyn ClusterAgent>, EngineError>;

    fn create_client(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<dyn KvBackend>, EngineError>;

    async fn start_http_servers(
        &self,
        agent: &Arc<dyn ClusterAgent>,
        config: &EngineConfig,
        sink: LogSink,
    ) -> Result<Vec<Box<dyn FrontEnd>>, EngineError>;
}
