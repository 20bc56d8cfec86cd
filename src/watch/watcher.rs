use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::interval_at;
use tokio::time::sleep;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::backoff::Backoff;
use crate::engine::ClusterAgent;
use crate::engine::EngineError;
use crate::engine::KvBackend;
use crate::engine::KvPair;
use crate::engine::QueryMeta;
use crate::engine::QueryOptions;
use crate::listener::Listeners;
use crate::metrics::gauge_value;
use crate::metrics::KEY_EVENTS;
use crate::metrics::NODE_EVENTS;
use crate::metrics::OUTCOME_ERROR;
use crate::metrics::OUTCOME_OK;
use crate::metrics::WATCH_BACKOFF_MS;
use crate::metrics::WATCH_INDEX;
use crate::metrics::WATCH_POLLS;
use crate::KeyEvent;
use crate::KeyStatus;
use crate::Node;
use crate::NodeEvent;
use crate::NodeStatus;
use crate::WatchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchState {
    /// No listing has succeeded yet; the next one becomes the silent baseline
    Initializing,
    /// Blocking on the last adopted index
    Polling,
    /// Waiting out the delay after a failed query
    Backoff,
}

/// Background loop turning key/value and roster changes into events.
///
/// Keys are diffed by `modify_index` between successive listings of the
/// watched prefix, and the roster is diffed by node id. Each transition is
/// published exactly once, in the order it was observed.
pub(crate) struct ChangeWatcher {
    node: String,
    kv: Arc<dyn KvBackend>,
    agent: Arc<dyn ClusterAgent>,
    listeners: Arc<Listeners>,
    config: WatchConfig,
    cancel: CancellationToken,

    state: WatchState,
    /// State to return to once a backoff delay has passed
    resume: WatchState,
    wait_index: Option<u64>,
    keys: HashMap<String, u64>,
    roster: BTreeMap<String, Node>,
    backoff: Backoff,
}

impl ChangeWatcher {
    pub(crate) fn new(
        node: String,
        kv: Arc<dyn KvBackend>,
        agent: Arc<dyn ClusterAgent>,
        listeners: Arc<Listeners>,
        config: WatchConfig,
        cancel: CancellationToken,
    ) -> Self {
        let roster = roster_of(agent.as_ref());
        let backoff = Backoff::new(config.backoff);
        Self {
            node,
            kv,
            agent,
            listeners,
            config,
            cancel,
            state: WatchState::Initializing,
            resume: WatchState::Initializing,
            wait_index: None,
            keys: HashMap::new(),
            roster,
            backoff,
        }
    }

    /// Seeds the key snapshot from a listing taken by the caller, so the loop
    /// starts polling right away.
    pub(crate) fn with_baseline(
        mut self,
        pairs: Vec<KvPair>,
        meta: QueryMeta,
    ) -> Self {
        self.keys = snapshot_of(pairs);
        self.adopt_index(meta);
        self.state = WatchState::Polling;
        self
    }

    /// Starts polling from an empty snapshot, so every key in the first
    /// successful listing is published as `Set`.
    pub(crate) fn without_baseline(mut self) -> Self {
        self.keys.clear();
        self.wait_index = None;
        self.state = WatchState::Polling;
        self
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub(crate) async fn run(mut self) {
        info!(node = %self.node, prefix = %self.config.prefix, "change watch started");

        while !self.cancel.is_cancelled() {
            let next = match self.state {
                WatchState::Initializing => self.initialize().await,
                WatchState::Polling => self.poll().await,
                WatchState::Backoff => self.back_off().await,
            };
            match next {
                Some(state) => self.state = state,
                None => break,
            }
        }

        info!(node = %self.node, "change watch stopped");
    }

    /// Fetches the current listing without blocking and keeps it as the
    /// baseline for later diffs.
    async fn initialize(&mut self) -> Option<WatchState> {
        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            r = self.kv.list(&self.config.prefix, QueryOptions::default()) => r,
        };

        match result {
            Ok((pairs, meta)) => {
                self.record_poll(OUTCOME_OK);
                self.keys = snapshot_of(pairs);
                self.adopt_index(meta);
                self.recovered();
                debug!(
                    node = %self.node,
                    keys = self.keys.len(),
                    index = ?self.wait_index,
                    "watch baseline taken"
                );
                Some(WatchState::Polling)
            }
            Err(e) => {
                self.record_failure(&e);
                self.resume = WatchState::Initializing;
                Some(WatchState::Backoff)
            }
        }
    }

    async fn poll(&mut self) -> Option<WatchState> {
        let opts = QueryOptions {
            wait_index: self.wait_index.unwrap_or_default(),
            wait_time: Some(self.config.wait_time()),
        };
        let kv = self.kv.clone();
        let prefix = self.config.prefix.clone();
        let query = async move { kv.list(&prefix, opts).await };
        tokio::pin!(query);

        let period = self.config.membership_interval();
        let mut roster_tick = interval_at(Instant::now() + period, period);
        roster_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cancel = self.cancel.clone();
        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                r = &mut query => break r,
                _ = roster_tick.tick() => self.sync_roster(),
            }
        };

        match result {
            Ok((pairs, meta)) => {
                self.record_poll(OUTCOME_OK);
                let events = self.diff_keys(pairs);
                self.adopt_index(meta);
                self.recovered();

                self.publish_keys(events);
                self.sync_roster();
                Some(WatchState::Polling)
            }
            Err(e) => {
                self.record_failure(&e);
                self.resume = WatchState::Polling;
                Some(WatchState::Backoff)
            }
        }
    }

    async fn back_off(&mut self) -> Option<WatchState> {
        let delay = self.backoff.next_delay();
        WATCH_BACKOFF_MS
            .with_label_values(&[&self.node])
            .set(gauge_value(delay.as_millis()));
        debug!(
            node = %self.node,
            ?delay,
            attempt = self.backoff.attempts(),
            "watch retry scheduled"
        );

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            _ = sleep(delay) => Some(self.resume),
        }
    }

    /// Replaces the key snapshot with `pairs` and returns the transitions.
    fn diff_keys(
        &mut self,
        pairs: Vec<KvPair>,
    ) -> Vec<KeyEvent> {
        let mut current = HashMap::with_capacity(pairs.len());
        let mut events = vec![];

        for pair in pairs {
            let status = match self.keys.get(&pair.key) {
                None => Some(KeyStatus::Set),
                Some(seen) if *seen != pair.modify_index => Some(KeyStatus::Changed),
                Some(_) => None,
            };
            if let Some(status) = status {
                events.push(KeyEvent {
                    key: pair.key.clone(),
                    status,
                });
            }
            current.insert(pair.key, pair.modify_index);
        }

        let mut deleted: Vec<_> = self
            .keys
            .keys()
            .filter(|k| !current.contains_key(*k))
            .cloned()
            .collect();
        deleted.sort();
        events.extend(deleted.into_iter().map(|key| KeyEvent {
            key,
            status: KeyStatus::Deleted,
        }));

        self.keys = current;
        events
    }

    /// The wait index never moves backwards and never drops to zero, which
    /// would turn the next query into a non-blocking one.
    fn adopt_index(
        &mut self,
        meta: QueryMeta,
    ) {
        let returned = meta.last_index.max(1);
        let next = match self.wait_index {
            Some(current) if returned < current => {
                warn!(
                    node = %self.node,
                    current,
                    returned,
                    "kv index went backwards, keeping the current one"
                );
                current
            }
            _ => returned,
        };
        self.wait_index = Some(next);
        WATCH_INDEX.with_label_values(&[&self.node]).set(gauge_value(next));
    }

    /// Diffs the LAN roster against the last one and publishes the result.
    fn sync_roster(&mut self) {
        let current = roster_of(self.agent.as_ref());
        let mut events = vec![];

        for (id, node) in &current {
            if !self.roster.contains_key(id) {
                events.push(NodeEvent {
                    node: node.clone(),
                    status: NodeStatus::Joined,
                });
            }
        }
        for (id, node) in &self.roster {
            if !current.contains_key(id) {
                events.push(NodeEvent {
                    node: node.clone(),
                    status: NodeStatus::Left,
                });
            }
        }

        self.roster = current;
        self.publish_nodes(events);
    }

    fn publish_keys(
        &self,
        events: Vec<KeyEvent>,
    ) {
        for event in events {
            trace!(node = %self.node, %event, "key event");
            KEY_EVENTS
                .with_label_values(&[&self.node, &event.status.to_string()])
                .inc();
            self.listeners.keys.dispatch(event);
        }
    }

    fn publish_nodes(
        &self,
        events: Vec<NodeEvent>,
    ) {
        for event in events {
            info!(node = %self.node, %event, "membership changed");
            NODE_EVENTS
                .with_label_values(&[&self.node, &event.status.to_string()])
                .inc();
            self.listeners.nodes.dispatch(event);
        }
    }

    fn record_poll(
        &self,
        outcome: &str,
    ) {
        WATCH_POLLS.with_label_values(&[&self.node, outcome]).inc();
    }

    fn recovered(&mut self) {
        if self.backoff.attempts() > 0 {
            debug!(node = %self.node, failures = self.backoff.attempts(), "watch query recovered");
            WATCH_BACKOFF_MS.with_label_values(&[&self.node]).set(0);
        }
        self.backoff.reset();
    }

    fn record_failure(
        &self,
        e: &EngineError,
    ) {
        self.record_poll(OUTCOME_ERROR);
        warn!(node = %self.node, error = %e, "watch query failed");
    }
}

fn snapshot_of(pairs: Vec<KvPair>) -> HashMap<String, u64> {
    pairs
        .into_iter()
        .map(|p| (p.key, p.modify_index))
        .collect()
}

fn roster_of(agent: &dyn ClusterAgent) -> BTreeMap<String, Node> {
    agent
        .lan_members()
        .into_iter()
        .map(Node::from)
        .map(|n| (n.id.clone(), n))
        .collect()
}
