use std::time::Duration;

use super::*;
use crate::engine::KvPair;
use crate::engine::QueryOptions;
use crate::test_utils::engine_config;
use crate::test_utils::start_agent;

#[tokio::test]
async fn test_create_agent_registers_roster_and_data_dir() {
    let engine = MemoryEngine::default();
    let dir = tempfile::tempdir().unwrap();
    let config = engine_config("alpha", 0, true, &dir);

    let agent = engine.create_agent(&config, LogSink::Discard).await.unwrap();

    assert!(config.data_dir.is_dir());
    assert_eq!(engine.network().agent_count(), 1);
    let members = agent.lan_members();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].name, "alpha");
    assert_eq!(members[0].addr, "127.0.0.1");
    assert_eq!(members[0].port, 8301);
}

#[tokio::test]
async fn test_create_agent_rejects_taken_gossip_address() {
    let engine = MemoryEngine::default();
    let _first = start_agent(&engine, "alpha", 0, true).await;

    let dir = tempfile::tempdir().unwrap();
    let config = engine_config("beta", 0, true, &dir);
    let result = engine.create_agent(&config, LogSink::Discard).await;

    assert!(matches!(result, Err(EngineError::AddressInUse(_))));
}

#[tokio::test]
async fn test_separate_networks_do_not_collide() {
    let first = MemoryEngine::new(MemoryNetwork::new());
    let second = MemoryEngine::new(MemoryNetwork::new());

    let _a = start_agent(&first, "alpha", 0, true).await;
    let _b = start_agent(&second, "alpha", 0, true).await;

    assert_eq!(first.network().agent_count(), 1);
    assert_eq!(second.network().agent_count(), 1);
}

#[tokio::test]
async fn test_create_client_requires_matching_datacenter() {
    let engine = MemoryEngine::default();
    let _a = start_agent(&engine, "alpha", 0, true).await;

    let wrong_dc = ClientConfig {
        address: "127.0.0.1:8500".into(),
        datacenter: "dc9".into(),
    };
    assert!(matches!(
        engine.create_client(&wrong_dc),
        Err(EngineError::UnknownDatacenter(_))
    ));

    let nobody = ClientConfig {
        address: "127.0.0.1:9999".into(),
        datacenter: "dc1".into(),
    };
    assert!(matches!(
        engine.create_client(&nobody),
        Err(EngineError::Unreachable(_))
    ));
}

#[tokio::test]
async fn test_kv_put_get_delete_advance_index() {
    let engine = MemoryEngine::default();
    let node = start_agent(&engine, "alpha", 0, true).await;

    let (_, meta) = node.kv.get("/", QueryOptions::default()).await.unwrap();
    let start = meta.last_index;
    assert!(start > 0);

    node.kv.put(KvPair::new("/app/one", "1")).await.unwrap();
    let (pair, meta) = node.kv.get("app/one", QueryOptions::default()).await.unwrap();
    let pair = pair.expect("key should exist");
    assert_eq!(pair.key, "app/one");
    assert_eq!(pair.value, b"1".to_vec());
    assert_eq!(pair.modify_index, start + 1);
    assert_eq!(meta.last_index, start + 1);

    node.kv.put(KvPair::new("app/one", "2")).await.unwrap();
    let (pair, _) = node.kv.get("app/one", QueryOptions::default()).await.unwrap();
    let pair = pair.unwrap();
    assert_eq!(pair.create_index, start + 1);
    assert_eq!(pair.modify_index, start + 2);

    node.kv.delete("app/one").await.unwrap();
    let (pair, meta) = node.kv.get("app/one", QueryOptions::default()).await.unwrap();
    assert!(pair.is_none());
    assert_eq!(meta.last_index, start + 3);

    // deleting an absent key is not a change
    node.kv.delete("app/one").await.unwrap();
    let (_, meta) = node.kv.get("/", QueryOptions::default()).await.unwrap();
    assert_eq!(meta.last_index, start + 3);
}

#[tokio::test]
async fn test_put_rejects_empty_key() {
    let engine = MemoryEngine::default();
    let node = start_agent(&engine, "alpha", 0, true).await;

    assert!(node.kv.put(KvPair::new("/", "x")).await.is_err());
}

#[tokio::test]
async fn test_leaderless_cluster_rejects_kv() {
    let engine = MemoryEngine::default();
    let node = start_agent(&engine, "lonely", 0, false).await;

    let result = node.kv.get("key", QueryOptions::default()).await;
    assert!(matches!(result, Err(EngineError::NoLeader)));
    let result = node.kv.put(KvPair::new("key", "v")).await;
    assert!(matches!(result, Err(EngineError::NoLeader)));
}

#[tokio::test]
async fn test_list_filters_by_prefix() {
    let engine = MemoryEngine::default();
    let node = start_agent(&engine, "alpha", 0, true).await;
    for key in ["app/a", "app/b", "apple", "other/c"] {
        node.kv.put(KvPair::new(key, "v")).await.unwrap();
    }

    let (pairs, _) = node.kv.list("app/", QueryOptions::default()).await.unwrap();
    let keys: Vec<_> = pairs.iter().map(|p| p.key.as_str()).collect();
    assert_eq!(keys, vec!["app/a", "app/b"]);

    let (pairs, _) = node.kv.list("/", QueryOptions::default()).await.unwrap();
    assert_eq!(pairs.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_blocking_list_times_out_with_same_index() {
    let engine = MemoryEngine::default();
    let node = start_agent(&engine, "alpha", 0, true).await;
    let (_, meta) = node.kv.list("/", QueryOptions::default()).await.unwrap();

    let started = tokio::time::Instant::now();
    let opts = QueryOptions {
        wait_index: meta.last_index,
        wait_time: Some(Duration::from_secs(5)),
    };
    let (_, after) = node.kv.list("/", opts).await.unwrap();

    assert_eq!(after.last_index, meta.last_index);
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn test_blocking_list_wakes_on_write() {
    let engine = MemoryEngine::default();
    let node = start_agent(&engine, "alpha", 0, true).await;
    let (_, meta) = node.kv.list("/", QueryOptions::default()).await.unwrap();

    let kv = node.kv.clone();
    let waiter = tokio::spawn(async move {
        let opts = QueryOptions {
            wait_index: meta.last_index,
            wait_time: Some(Duration::from_secs(30)),
        };
        kv.list("/", opts).await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    node.kv.put(KvPair::new("wake", "up")).await.unwrap();

    let (pairs, after) = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("blocking list should return after a write")
        .unwrap()
        .unwrap();
    assert!(after.last_index > meta.last_index);
    assert_eq!(pairs.len(), 1);
}

#[tokio::test]
async fn test_join_merges_roster_and_shares_data() {
    let engine = MemoryEngine::default();
    let leader = start_agent(&engine, "alpha", 0, true).await;
    let follower = start_agent(&engine, "beta", 10, false).await;

    leader.kv.put(KvPair::new("shared", "yes")).await.unwrap();

    let joined = follower
        .agent
        .join_lan(&["127.0.0.1:8301".to_string()])
        .await
        .unwrap();
    assert_eq!(joined, 1);

    assert_eq!(leader.agent.lan_members().len(), 2);
    assert_eq!(follower.agent.lan_members().len(), 2);

    // the follower now reads through the leader's cluster
    let (pair, _) = follower.kv.get("shared", QueryOptions::default()).await.unwrap();
    assert_eq!(pair.unwrap().value, b"yes".to_vec());
}

#[tokio::test]
async fn test_join_wakes_blocked_query_on_retired_cluster() {
    let engine = MemoryEngine::default();
    let first = start_agent(&engine, "alpha", 0, true).await;
    let second = start_agent(&engine, "beta", 10, true).await;
    let (_, meta) = second.kv.list("/", QueryOptions::default()).await.unwrap();

    let kv = second.kv.clone();
    let waiter = tokio::spawn(async move {
        let opts = QueryOptions {
            wait_index: meta.last_index,
            wait_time: Some(Duration::from_secs(30)),
        };
        kv.list("/", opts).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    second
        .agent
        .join_lan(&["127.0.0.1:8301".to_string()])
        .await
        .unwrap();
    first.kv.put(KvPair::new("k", "v")).await.unwrap();

    let (_, after) = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("merge should wake the waiter")
        .unwrap()
        .unwrap();
    assert!(after.last_index > meta.last_index);
}

#[tokio::test]
async fn test_join_unknown_member_fails() {
    let engine = MemoryEngine::default();
    let node = start_agent(&engine, "alpha", 0, true).await;

    let result = node.agent.join_lan(&["127.0.0.1:1".to_string()]).await;
    assert!(matches!(result, Err(EngineError::JoinFailed(_))));
}

#[tokio::test]
async fn test_leave_then_shutdown_removes_member() {
    let engine = MemoryEngine::default();
    let leader = start_agent(&engine, "alpha", 0, true).await;
    let follower = start_agent(&engine, "beta", 10, false).await;
    follower
        .agent
        .join_lan(&["127.0.0.1:8301".to_string()])
        .await
        .unwrap();

    follower.agent.leave().await.unwrap();
    assert_eq!(leader.agent.lan_members().len(), 1);

    follower.agent.shutdown().await.unwrap();
    assert_eq!(engine.network().agent_count(), 1);
    assert!(follower.agent.lan_members().is_empty());
    assert!(matches!(
        follower.kv.get("x", QueryOptions::default()).await,
        Err(EngineError::Shutdown)
    ));
    assert!(matches!(follower.agent.leave().await, Err(EngineError::Shutdown)));

    // shutdown is idempotent and frees the gossip address
    follower.agent.shutdown().await.unwrap();
    let _again = start_agent(&engine, "beta", 10, false).await;
}

#[tokio::test]
async fn test_shutdown_releases_blocked_query() {
    let engine = MemoryEngine::default();
    let node = start_agent(&engine, "alpha", 0, true).await;
    let (_, meta) = node.kv.list("/", QueryOptions::default()).await.unwrap();

    let kv = node.kv.clone();
    let waiter = tokio::spawn(async move {
        let opts = QueryOptions {
            wait_index: meta.last_index,
            wait_time: Some(Duration::from_secs(30)),
        };
        kv.list("/", opts).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    node.agent.shutdown().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("shutdown should release the waiter")
        .unwrap();
    assert!(matches!(result, Err(EngineError::Shutdown)));
}

#[tokio::test]
async fn test_http_front_end_holds_port_until_shutdown() {
    let engine = MemoryEngine::default();
    let dir = tempfile::tempdir().unwrap();
    let mut config = engine_config("alpha", 0, true, &dir);
    config.client_addr = "127.0.0.1".into();
    config.ports.http = 0;
    let agent = engine.create_agent(&config, LogSink::Discard).await.unwrap();

    let servers = engine
        .start_http_servers(&agent, &config, LogSink::Discard)
        .await
        .unwrap();
    assert_eq!(servers.len(), 1);
    let addr = servers[0].address();
    assert_ne!(addr.port(), 0);

    assert!(tokio::net::TcpListener::bind(addr).await.is_err());
    servers[0].shutdown();
    assert!(tokio::net::TcpListener::bind(addr).await.is_ok());
}
