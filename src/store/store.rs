//! The embeddable coordination store.
//!
//! A [`DistroStore`] owns one cluster agent of the wrapped engine, a client
//! handle bound to that agent, and the background change watch feeding the
//! registered listeners.
//!
//! ## Example Usage
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use distro_store::engine::memory::MemoryEngine;
//! # use distro_store::DistroStore;
//! # use distro_store::StoreConfig;
//! # async fn run() -> distro_store::Result<()> {
//! let config = StoreConfig::new()?.validate()?;
//! let store = DistroStore::new(config, Arc::new(MemoryEngine::default())).await?;
//! store.set("services/web", "10.0.0.1:80").await?;
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::engine::ClientConfig;
use crate::engine::ClusterAgent;
use crate::engine::Engine;
use crate::engine::EngineConfig;
use crate::engine::FrontEnd;
use crate::engine::KvBackend;
use crate::engine::KvPair;
use crate::engine::LogSink;
use crate::engine::QueryOptions;
use crate::listener::ListenerId;
use crate::listener::Listeners;
use crate::utils::net::is_endpoint;
use crate::watch::ChangeWatcher;
use crate::watch::WatchHandle;
use crate::Error;
use crate::KeyEvent;
use crate::Node;
use crate::NodeEvent;
use crate::Result;
use crate::StoreConfig;

pub struct DistroStore {
    config: StoreConfig,
    agent: Arc<dyn ClusterAgent>,
    kv: Arc<dyn KvBackend>,
    front_ends: Mutex<Vec<Box<dyn FrontEnd>>>,
    listeners: Arc<Listeners>,
    watch: Option<WatchHandle>,
}

impl DistroStore {
    /// Starts a node of `engine` configured by `config`.
    ///
    /// Seed members are joined in one batch; a failed initial join is logged
    /// and the node keeps running on its own.
    pub async fn new(
        config: StoreConfig,
        engine: Arc<dyn Engine>,
    ) -> Result<Self> {
        let engine_config = EngineConfig::try_from(&config)?;
        let sink = LogSink::for_level(config.log_level);

        let agent = engine.create_agent(&engine_config, sink).await?;
        info!(
            node = %engine_config.node_name,
            datacenter = %engine_config.datacenter,
            gossip_port = engine_config.ports.serf_lan,
            "agent created"
        );

        let assembled = Self::assemble(
            config,
            engine.as_ref(),
            agent.clone(),
            &engine_config,
            sink,
        )
        .await;
        match assembled {
            Ok(store) => Ok(store),
            Err(e) => {
                if let Err(err) = agent.shutdown().await {
                    warn!(error = %err, "agent shutdown after failed start");
                }
                Err(e)
            }
        }
    }

    async fn assemble(
        config: StoreConfig,
        engine: &dyn Engine,
        agent: Arc<dyn ClusterAgent>,
        engine_config: &EngineConfig,
        sink: LogSink,
    ) -> Result<Self> {
        if !engine_config.start_join.is_empty() {
            match agent.join_lan(&engine_config.start_join).await {
                Ok(joined) => debug!(joined, "initial join done"),
                Err(e) => warn!(
                    seeds = ?engine_config.start_join,
                    error = %e,
                    "initial join failed, continuing without peers"
                ),
            }
        }

        let front_ends = if config.enable_http {
            let front_ends = engine
                .start_http_servers(&agent, engine_config, sink)
                .await?;
            for front_end in &front_ends {
                debug!(addr = %front_end.address(), "http front-end started");
            }
            front_ends
        } else {
            vec![]
        };

        agent.start_sync();

        let client_config = ClientConfig::from(engine_config);
        let kv = engine.create_client(&client_config)?;
        debug!(address = %client_config.address, "client created");

        let listeners = Arc::new(Listeners::default());
        let watch = if config.watch.enabled {
            Some(Self::start_watch(&config, engine_config, &kv, &agent, &listeners).await)
        } else {
            None
        };

        Ok(Self {
            config,
            agent,
            kv,
            front_ends: Mutex::new(front_ends),
            listeners,
            watch,
        })
    }

    async fn start_watch(
        config: &StoreConfig,
        engine_config: &EngineConfig,
        kv: &Arc<dyn KvBackend>,
        agent: &Arc<dyn ClusterAgent>,
        listeners: &Arc<Listeners>,
    ) -> WatchHandle {
        let label = if engine_config.node_name.is_empty() {
            format!("{}:{}", config.advertised_address(), engine_config.ports.serf_lan)
        } else {
            engine_config.node_name.clone()
        };

        let cancel = CancellationToken::new();
        let mut watcher = ChangeWatcher::new(
            label,
            kv.clone(),
            agent.clone(),
            listeners.clone(),
            config.watch.clone(),
            cancel.clone(),
        );

        // A cluster that cannot list yet starts the watch from an empty snapshot.
        match kv.list(&config.watch.prefix, QueryOptions::default()).await {
            Ok((pairs, meta)) => watcher = watcher.with_baseline(pairs, meta),
            Err(e) => {
                debug!(error = %e, "no key baseline yet, keys listed later are new");
                watcher = watcher.without_baseline();
            }
        }

        WatchHandle::start(watcher, cancel)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Joins the cluster through one existing member at `address` (`host:port`).
    pub async fn join(
        &self,
        address: &str,
    ) -> Result<()> {
        if !is_endpoint(address) {
            return Err(Error::InvalidAddress(address.to_string()));
        }
        let joined = self.agent.join_lan(&[address.to_string()]).await?;
        info!(%address, joined, "joined cluster");
        Ok(())
    }

    /// Stops the change watch, leaves the cluster, then shuts the agent and
    /// its front-ends down.
    ///
    /// A failed leave is returned as is and the agent is left running.
    pub async fn close(&self) -> Result<()> {
        if let Some(watch) = &self.watch {
            watch.stop().await;
        }

        self.agent.leave().await?;
        self.agent.shutdown().await?;

        let front_ends = std::mem::take(&mut *self.front_ends.lock());
        for front_end in front_ends {
            debug!(addr = %front_end.address(), "stopping http front-end");
            front_end.shutdown();
        }

        info!(node = %self.config.node_name, "store closed");
        Ok(())
    }

    /// Snapshot of the LAN roster
    pub fn nodes(&self) -> Vec<Node> {
        self.agent
            .lan_members()
            .into_iter()
            .map(Node::from)
            .collect()
    }

    /// Value stored under `key`, or `None` when the key is absent.
    pub async fn get(
        &self,
        key: &str,
    ) -> Result<Option<String>> {
        let (pair, _) = self.kv.get(key, QueryOptions::default()).await?;
        Ok(pair.map(|p| String::from_utf8_lossy(&p.value).into_owned()))
    }

    pub async fn exists(
        &self,
        key: &str,
    ) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    pub async fn set(
        &self,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.kv.put(KvPair::new(key, value)).await?;
        Ok(())
    }

    /// Removes `key`; removing an absent key succeeds.
    pub async fn delete(
        &self,
        key: &str,
    ) -> Result<()> {
        self.kv.delete(key).await?;
        Ok(())
    }

    pub fn add_node_listener(
        &self,
        sender: mpsc::Sender<NodeEvent>,
    ) -> ListenerId {
        self.listeners.nodes.add(sender)
    }

    pub fn remove_node_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.listeners.nodes.remove(id)
    }

    pub fn add_key_listener(
        &self,
        sender: mpsc::Sender<KeyEvent>,
    ) -> ListenerId {
        self.listeners.keys.add(sender)
    }

    pub fn remove_key_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.listeners.keys.remove(id)
    }
}
