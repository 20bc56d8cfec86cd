use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tracing::trace;

use super::agent::AgentState;
use crate::engine::EngineError;
use crate::engine::KvBackend;
use crate::engine::KvPair;
use crate::engine::QueryMeta;
use crate::engine::QueryOptions;

/// Upper bound for a blocking query that did not name a wait time
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Key/value table of one cluster.
///
/// `index` is only written while the data lock is held, so a reader holding
/// the lock sees a listing and an index that belong together.
pub(crate) struct KvTable {
    data: RwLock<BTreeMap<String, KvPair>>,
    index: watch::Sender<u64>,
}

impl KvTable {
    pub(crate) fn new() -> Self {
        // Index 0 means "don't block"; a fresh table already sits at 1.
        let (index, _) = watch::channel(1);
        Self {
            data: RwLock::new(BTreeMap::new()),
            index,
        }
    }

    pub(crate) fn index(&self) -> u64 {
        *self.index.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.index.subscribe()
    }

    /// Moves the index beyond `other`, as a membership write would.
    pub(crate) fn advance_past(
        &self,
        other: u64,
    ) {
        let _data = self.data.write();
        self.index.send_modify(|idx| *idx = (*idx).max(other) + 1);
    }

    /// Wakes blocked queries without changing the index
    pub(crate) fn wake_waiters(&self) {
        self.index.send_modify(|_| {});
    }

    fn get(
        &self,
        key: &str,
    ) -> (Option<KvPair>, QueryMeta) {
        let data = self.data.read();
        let meta = QueryMeta {
            last_index: self.index(),
        };
        (data.get(key).cloned(), meta)
    }

    fn put(
        &self,
        mut pair: KvPair,
    ) -> u64 {
        let mut data = self.data.write();
        let next = self.index() + 1;
        pair.create_index = data.get(&pair.key).map(|p| p.create_index).unwrap_or(next);
        pair.modify_index = next;
        data.insert(pair.key.clone(), pair);
        self.index.send_replace(next);
        next
    }

    fn delete(
        &self,
        key: &str,
    ) -> Option<u64> {
        let mut data = self.data.write();
        data.remove(key)?;
        let next = self.index() + 1;
        self.index.send_replace(next);
        Some(next)
    }

    fn list(
        &self,
        prefix: &str,
    ) -> (Vec<KvPair>, QueryMeta) {
        let data = self.data.read();
        let pairs = data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, p)| p.clone())
            .collect();
        (pairs, QueryMeta {
            last_index: self.index(),
        })
    }
}

/// Keys are stored without a leading slash; "/" addresses the root.
fn normalize(key: &str) -> &str {
    key.trim_start_matches('/')
}

/// [`KvBackend`] bound to one in-process agent
pub struct MemoryKv {
    agent: Arc<AgentState>,
}

impl MemoryKv {
    pub(crate) fn new(agent: Arc<AgentState>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl KvBackend for MemoryKv {
    async fn get(
        &self,
        key: &str,
        _opts: QueryOptions,
    ) -> Result<(Option<KvPair>, QueryMeta), EngineError> {
        let cluster = self.agent.serving_cluster()?;
        Ok(cluster.kv.get(normalize(key)))
    }

    async fn put(
        &self,
        mut pair: KvPair,
    ) -> Result<(), EngineError> {
        let key = normalize(&pair.key).to_string();
        if key.is_empty() {
            return Err(EngineError::Other("missing key name".into()));
        }
        pair.key = key;

        let cluster = self.agent.serving_cluster()?;
        let index = cluster.kv.put(pair);
        trace!(index, "kv put applied");
        Ok(())
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<(), EngineError> {
        let cluster = self.agent.serving_cluster()?;
        if let Some(index) = cluster.kv.delete(normalize(key)) {
            trace!(index, "kv delete applied");
        }
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        opts: QueryOptions,
    ) -> Result<(Vec<KvPair>, QueryMeta), EngineError> {
        let prefix = normalize(prefix);
        let deadline = Instant::now() + opts.wait_time.unwrap_or(DEFAULT_MAX_WAIT);

        loop {
            // Re-resolved each round: a join may have moved the agent.
            let cluster = self.agent.serving_cluster()?;
            let mut changes = cluster.kv.subscribe();
            let index = *changes.borrow_and_update();

            if opts.wait_index == 0 || index > opts.wait_index {
                return Ok(cluster.kv.list(prefix));
            }

            match timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return Ok(cluster.kv.list(prefix)),
            }
        }
    }
}
