use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use nanoid::nanoid;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::gossip_endpoint;
use super::kv::KvTable;
use super::MemoryNetwork;
use crate::engine::ClusterAgent;
use crate::engine::EngineConfig;
use crate::engine::EngineError;
use crate::engine::LogSink;
use crate::engine::Member;
use crate::utils::net::client_endpoint;
use crate::utils::net::dialable_address;

/// Roster and data shared by every agent of one cluster
pub(crate) struct Cluster {
    pub(crate) id: String,
    has_leader: AtomicBool,
    members: RwLock<BTreeMap<String, Weak<AgentState>>>,
    pub(crate) kv: KvTable,
}

impl Cluster {
    fn founded_by(
        agent: &Arc<AgentState>,
        has_leader: bool,
    ) -> Arc<Self> {
        let mut members = BTreeMap::new();
        members.insert(agent.member.name.clone(), Arc::downgrade(agent));
        Arc::new(Self {
            id: nanoid!(10),
            has_leader: AtomicBool::new(has_leader),
            members: RwLock::new(members),
            kv: KvTable::new(),
        })
    }

    pub(crate) fn has_leader(&self) -> bool {
        self.has_leader.load(Ordering::Acquire)
    }

    fn live_members(&self) -> Vec<Arc<AgentState>> {
        self.members
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|a| a.is_alive())
            .collect()
    }
}

/// Identity and cluster pointer of one in-process agent
pub(crate) struct AgentState {
    member: Member,
    datacenter: String,
    leader_eligible: bool,
    gossip_endpoint: String,
    client_endpoint: String,
    cluster: ArcSwap<Cluster>,
    alive: AtomicBool,
    synced: AtomicBool,
    sink: LogSink,
}

impl AgentState {
    pub(crate) fn new(
        config: &EngineConfig,
        sink: LogSink,
    ) -> Arc<Self> {
        let name = if config.node_name.is_empty() {
            format!("node-{}", nanoid!(8))
        } else {
            config.node_name.clone()
        };
        let addr = config
            .advertise_addr
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| dialable_address(&config.bind_addr))
            .to_string();
        let leader_eligible = config.server && config.bootstrap;

        Arc::new_cyclic(|weak: &Weak<AgentState>| {
            let mut members = BTreeMap::new();
            members.insert(name.clone(), weak.clone());
            AgentState {
                member: Member {
                    name: name.clone(),
                    addr,
                    port: config.ports.serf_lan,
                },
                datacenter: config.datacenter.clone(),
                leader_eligible,
                gossip_endpoint: gossip_endpoint(&config.bind_addr, config.ports.serf_lan),
                client_endpoint: client_endpoint(&config.client_addr, config.ports.http),
                cluster: ArcSwap::from_pointee(Cluster {
                    id: nanoid!(10),
                    has_leader: AtomicBool::new(leader_eligible),
                    members: RwLock::new(members),
                    kv: KvTable::new(),
                }),
                alive: AtomicBool::new(true),
                synced: AtomicBool::new(false),
                sink,
            }
        })
    }

    pub(crate) fn member(&self) -> &Member {
        &self.member
    }

    pub(crate) fn datacenter(&self) -> &str {
        &self.datacenter
    }

    pub(crate) fn gossip_endpoint(&self) -> &str {
        &self.gossip_endpoint
    }

    pub(crate) fn client_endpoint(&self) -> &str {
        &self.client_endpoint
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn cluster(&self) -> Arc<Cluster> {
        self.cluster.load_full()
    }

    /// Cluster to serve a key/value call from; fails when the agent is gone
    /// or the cluster has no leader.
    pub(crate) fn serving_cluster(&self) -> Result<Arc<Cluster>, EngineError> {
        if !self.is_alive() {
            return Err(EngineError::Shutdown);
        }
        let cluster = self.cluster();
        if !cluster.has_leader() {
            return Err(EngineError::NoLeader);
        }
        Ok(cluster)
    }
}

/// Moves every live member of `from` into `into`.
///
/// The merged index ends past both clusters' indexes so no blocked query can
/// miss the change, and waiters on `from` are woken to re-resolve.
fn merge_clusters(
    from: &Arc<Cluster>,
    into: &Arc<Cluster>,
) {
    if Arc::ptr_eq(from, into) {
        return;
    }

    let moved = from.live_members();
    {
        let mut members = into.members.write();
        for agent in &moved {
            members.insert(agent.member.name.clone(), Arc::downgrade(agent));
            agent.cluster.store(into.clone());
        }
    }
    from.members.write().clear();

    if from.has_leader() {
        into.has_leader.store(true, Ordering::Release);
    }
    into.kv.advance_past(from.kv.index());
    from.kv.wake_waiters();

    debug!(from = %from.id, into = %into.id, moved = moved.len(), "clusters merged");
}

/// [`ClusterAgent`] living in a [`MemoryNetwork`]
pub struct MemoryAgent {
    state: Arc<AgentState>,
    network: MemoryNetwork,
}

impl MemoryAgent {
    pub(crate) fn new(
        state: Arc<AgentState>,
        network: MemoryNetwork,
    ) -> Self {
        Self { state, network }
    }

    /// Name the agent registered under
    pub fn name(&self) -> &str {
        &self.state.member.name
    }

    pub fn is_synced(&self) -> bool {
        self.state.synced.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ClusterAgent for MemoryAgent {
    async fn join_lan(
        &self,
        addrs: &[String],
    ) -> Result<usize, EngineError> {
        if !self.state.is_alive() {
            return Err(EngineError::Shutdown);
        }

        let mut joined = 0;
        for addr in addrs {
            let Some(target) = self.network.lookup_gossip(addr) else {
                warn!(node = %self.state.member.name, %addr, "join target unreachable");
                continue;
            };
            if Arc::ptr_eq(&target, &self.state) {
                continue;
            }
            if target.datacenter != self.state.datacenter {
                warn!(%addr, dc = %target.datacenter, "refusing LAN join across datacenters");
                continue;
            }

            let _guard = self.network.inner.merge_lock.lock();
            merge_clusters(&self.state.cluster(), &target.cluster());
            joined += 1;
        }

        if joined == 0 && !addrs.is_empty() {
            return Err(EngineError::JoinFailed(addrs.to_vec()));
        }

        info!(node = %self.state.member.name, joined, "joined LAN pool");
        self.state
            .sink
            .emit(&format!("[INFO] agent: joined {joined} of {} members", addrs.len()));
        Ok(joined)
    }

    async fn leave(&self) -> Result<(), EngineError> {
        if !self.state.is_alive() {
            return Err(EngineError::Shutdown);
        }

        let _guard = self.network.inner.merge_lock.lock();
        let cluster = self.state.cluster();
        let was_member = cluster
            .members
            .write()
            .remove(&self.state.member.name)
            .is_some();
        if was_member {
            self.state
                .cluster
                .store(Cluster::founded_by(&self.state, false));
            self.state.sink.emit("[INFO] agent: graceful leave complete");
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), EngineError> {
        if !self.state.alive.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        self.network.unregister(&self.state);
        let cluster = self.state.cluster();
        cluster.members.write().remove(&self.state.member.name);
        cluster.kv.wake_waiters();

        info!(node = %self.state.member.name, "memory agent shut down");
        self.state.sink.emit("[INFO] agent: shutdown complete");
        Ok(())
    }

    fn start_sync(&self) {
        self.state.synced.store(true, Ordering::Release);
        debug!(
            node = %self.state.member.name,
            leader_eligible = self.state.leader_eligible,
            "anti-entropy sync started"
        );
    }

    fn lan_members(&self) -> Vec<Member> {
        if !self.state.is_alive() {
            return vec![];
        }
        self.state
            .cluster()
            .live_members()
            .into_iter()
            .map(|a| a.member.clone())
            .collect()
    }
}
