//! In-process implementation of the engine contract.
//!
//! Agents live in a [`MemoryNetwork`], a namespace addressed by LAN gossip
//! and client endpoints. Each agent belongs to a cluster that owns the roster
//! and a key/value table whose index only moves forward. Joining merges the
//! joiner's cluster into the target's: the target's data wins, the combined
//! index is bumped past both, and blocked queries on the retired cluster are
//! woken so they re-resolve.
//!
//! A cluster has a leader once a bootstrap server belongs to it; key/value
//! calls against a leaderless cluster fail with [`EngineError::NoLeader`].
//!
//! Nothing here speaks a wire protocol. HTTP front-ends only hold their port
//! so collisions surface the way they would against a real engine.
//!
//! Networks are plain values: build one per test, share it between the nodes
//! that should see each other.

mod agent;
mod kv;

pub use agent::MemoryAgent;
pub use kv::MemoryKv;

#[cfg(test)]
mod memory_test;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::debug;
use tracing::info;

use self::agent::AgentState;
use super::ClientConfig;
use super::ClusterAgent;
use super::Engine;
use super::EngineConfig;
use super::EngineError;
use super::FrontEnd;
use super::KvBackend;
use super::LogSink;
use crate::utils::net::client_endpoint;
use crate::utils::net::dialable_address;

/// Shared address space of in-process agents
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    /// LAN gossip endpoint -> agent
    gossip: DashMap<String, Arc<AgentState>>,
    /// client API endpoint -> agent
    clients: DashMap<String, Arc<AgentState>>,
    /// Serializes cluster merges so two joins never lock rosters in opposite order
    merge_lock: Mutex<()>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live agents registered in this network
    pub fn agent_count(&self) -> usize {
        self.inner.gossip.iter().filter(|a| a.is_alive()).count()
    }

    fn lookup_gossip(
        &self,
        endpoint: &str,
    ) -> Option<Arc<AgentState>> {
        self.inner
            .gossip
            .get(endpoint)
            .map(|a| a.value().clone())
            .filter(|a| a.is_alive())
    }

    fn register(
        &self,
        agent: &Arc<AgentState>,
    ) -> Result<(), EngineError> {
        let gossip = agent.gossip_endpoint().to_string();
        if self.lookup_gossip(&gossip).is_some() {
            return Err(EngineError::AddressInUse(gossip));
        }
        let client = agent.client_endpoint().to_string();
        if self.inner.clients.get(&client).map(|a| a.is_alive()).unwrap_or(false) {
            return Err(EngineError::AddressInUse(client));
        }

        self.inner.gossip.insert(gossip, agent.clone());
        self.inner.clients.insert(client, agent.clone());
        Ok(())
    }

    fn unregister(
        &self,
        agent: &Arc<AgentState>,
    ) {
        self.inner
            .gossip
            .remove_if(agent.gossip_endpoint(), |_, a| Arc::ptr_eq(a, agent));
        self.inner
            .clients
            .remove_if(agent.client_endpoint(), |_, a| Arc::ptr_eq(a, agent));
    }
}

/// [`Engine`] backed by a [`MemoryNetwork`]
#[derive(Clone, Default)]
pub struct MemoryEngine {
    network: MemoryNetwork,
}

impl MemoryEngine {
    pub fn new(network: MemoryNetwork) -> Self {
        Self { network }
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn create_agent(
        &self,
        config: &EngineConfig,
        sink: LogSink,
    ) -> Result<Arc<dyn ClusterAgent>, EngineError> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let state = AgentState::new(config, sink);
        self.network.register(&state)?;

        info!(
            node = %state.member().name,
            gossip = %state.gossip_endpoint(),
            bootstrap = config.bootstrap,
            "memory agent created"
        );
        sink.emit(&format!(
            "[INFO] agent: node '{}' started on {}",
            state.member().name,
            state.gossip_endpoint()
        ));

        Ok(Arc::new(MemoryAgent::new(state, self.network.clone())))
    }

    fn create_client(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<dyn KvBackend>, EngineError> {
        let agent = self
            .network
            .inner
            .clients
            .get(&config.address)
            .map(|a| a.value().clone())
            .filter(|a| a.is_alive())
            .ok_or_else(|| EngineError::Unreachable(config.address.clone()))?;

        if agent.datacenter() != config.datacenter {
            return Err(EngineError::UnknownDatacenter(config.datacenter.clone()));
        }

        debug!(address = %config.address, "memory client bound");
        Ok(Arc::new(MemoryKv::new(agent)))
    }

    async fn start_http_servers(
        &self,
        _agent: &Arc<dyn ClusterAgent>,
        config: &EngineConfig,
        sink: LogSink,
    ) -> Result<Vec<Box<dyn FrontEnd>>, EngineError> {
        let bind = format!("{}:{}", config.client_addr, config.ports.http);
        let listener = TcpListener::bind(&bind).await?;
        let addr = listener.local_addr()?;

        sink.emit(&format!("[INFO] agent: HTTP API reserved on {addr}"));
        debug!(%addr, dialable = %client_endpoint(&config.client_addr, config.ports.http), "http front-end bound");

        Ok(vec![Box::new(MemoryFrontEnd {
            addr,
            listener: Mutex::new(Some(listener)),
        })])
    }
}

/// HTTP front-end placeholder holding its listening socket
pub struct MemoryFrontEnd {
    addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
}

impl FrontEnd for MemoryFrontEnd {
    fn address(&self) -> SocketAddr {
        self.addr
    }

    fn shutdown(&self) {
        if self.listener.lock().take().is_some() {
            debug!(addr = %self.addr, "http front-end released");
        }
    }
}

pub(crate) fn gossip_endpoint(
    bind_addr: &str,
    port: u16,
) -> String {
    format!("{}:{}", dialable_address(bind_addr), port)
}
