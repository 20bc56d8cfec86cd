//! Fixtures shared by the unit tests
use std::sync::Arc;

use tempfile::TempDir;

use crate::engine::memory::MemoryEngine;
use crate::engine::ClientConfig;
use crate::engine::ClusterAgent;
use crate::engine::Engine;
use crate::engine::EngineConfig;
use crate::engine::KvBackend;
use crate::engine::LogSink;
use crate::engine::Member;
use crate::StoreConfig;

pub(crate) struct TestAgent {
    pub(crate) agent: Arc<dyn ClusterAgent>,
    pub(crate) kv: Arc<dyn KvBackend>,
    pub(crate) _dir: TempDir,
}

/// Loopback config of one node, ports shifted by `offset`
pub(crate) fn store_config(
    name: &str,
    offset: u16,
    bootstrap: bool,
    dir: &TempDir,
) -> StoreConfig {
    let mut config = StoreConfig {
        node_name: name.into(),
        bootstrap,
        bind_address: "127.0.0.1".into(),
        data_dir: dir.path().join("data"),
        enable_http: false,
        ..Default::default()
    };
    config.ports.apply_index(offset).unwrap();
    config
}

pub(crate) fn engine_config(
    name: &str,
    offset: u16,
    bootstrap: bool,
    dir: &TempDir,
) -> EngineConfig {
    EngineConfig::try_from(&store_config(name, offset, bootstrap, dir)).unwrap()
}

pub(crate) async fn start_agent(
    engine: &MemoryEngine,
    name: &str,
    offset: u16,
    bootstrap: bool,
) -> TestAgent {
    let dir = tempfile::tempdir().unwrap();
    let config = engine_config(name, offset, bootstrap, &dir);
    let agent = engine.create_agent(&config, LogSink::Discard).await.unwrap();
    let kv = engine.create_client(&ClientConfig::from(&config)).unwrap();
    TestAgent {
        agent,
        kv,
        _dir: dir,
    }
}

pub(crate) fn member(
    name: &str,
    port: u16,
) -> Member {
    Member {
        name: name.into(),
        addr: "127.0.0.1".into(),
        port,
    }
}
