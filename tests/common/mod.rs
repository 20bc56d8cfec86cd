// Each integration test binary uses a different subset of these fixtures.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use distro_store::engine::memory::MemoryEngine;
use distro_store::DistroStore;
use distro_store::StoreConfig;
use distro_store::WatchConfig;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time;

/// Upper bound for cluster-wide changes to become visible
pub const SETTLE_TIME: Duration = Duration::from_secs(5);

/// Expected quiet period when asserting that nothing more arrives
pub const QUIET_TIME: Duration = Duration::from_millis(300);

pub const LOCALHOST: &str = "127.0.0.1";

pub struct TestNode {
    pub store: DistroStore,
    pub gossip_port: u16,
    _dir: TempDir,
}

impl TestNode {
    pub fn gossip_endpoint(&self) -> String {
        format!("{}:{}", LOCALHOST, self.gossip_port)
    }
}

/// Fresh engine with its own network; nothing is shared between tests.
pub fn new_engine() -> Arc<MemoryEngine> {
    Arc::new(MemoryEngine::default())
}

pub fn node_config(
    name: &str,
    offset: u16,
    bootstrap: bool,
    dir: &TempDir,
) -> StoreConfig {
    let mut config = StoreConfig {
        node_name: name.to_string(),
        bootstrap,
        bind_address: LOCALHOST.to_string(),
        data_dir: dir.path().join("data"),
        enable_http: false,
        watch: WatchConfig {
            wait_time_ms: 2_000,
            membership_interval_ms: 50,
            ..Default::default()
        },
        ..Default::default()
    };
    config
        .ports
        .apply_index(offset)
        .expect("offset fits every port");
    config
}

pub async fn start_node(
    engine: &Arc<MemoryEngine>,
    name: &str,
    offset: u16,
    bootstrap: bool,
) -> TestNode {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = node_config(name, offset, bootstrap, &dir);
    let gossip_port = config.ports.serf_lan;
    let store = DistroStore::new(config, engine.clone())
        .await
        .expect("node starts");
    TestNode {
        store,
        gossip_port,
        _dir: dir,
    }
}

/// Polls `check` until it holds or [`SETTLE_TIME`] passes
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = time::Instant::now() + SETTLE_TIME;
    while time::Instant::now() < deadline {
        if check() {
            return true;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

pub async fn next_event<E>(rx: &mut mpsc::Receiver<E>) -> E {
    time::timeout(SETTLE_TIME, rx.recv())
        .await
        .expect("event within settle time")
        .expect("listener channel open")
}

/// Asserts that nothing arrives on `rx` for [`QUIET_TIME`]
pub async fn assert_quiet<E: std::fmt::Debug>(rx: &mut mpsc::Receiver<E>) {
    if let Ok(Some(event)) = time::timeout(QUIET_TIME, rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}
