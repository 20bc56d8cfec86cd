//! Subscriber registry for node and key events.
//!
//! Registration takes the write lock; dispatch clones a snapshot under the
//! read lock and never waits on a subscriber. Each listener owns an ordered
//! backlog that a delivery task drains into its channel, so a subscriber that
//! stops reading only holds back its own events.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;
use tracing::Instrument;

use crate::KeyEvent;
use crate::NodeEvent;

/// How long a delivery may wait on a full channel before it is reported
pub(crate) const STALL_WARNING: Duration = Duration::from_secs(5);

/// Token returned by registration, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Subscriber<E> {
    sender: mpsc::Sender<E>,
    backlog: mpsc::UnboundedSender<E>,
    /// Taken by the first dispatch, which starts the delivery task
    pending: Mutex<Option<mpsc::UnboundedReceiver<E>>>,
    cancel: CancellationToken,
}

impl<E> Subscriber<E>
where
    E: Send + 'static,
{
    fn new(sender: mpsc::Sender<E>) -> Self {
        let (backlog, pending) = mpsc::unbounded_channel();
        Self {
            sender,
            backlog,
            pending: Mutex::new(Some(pending)),
            cancel: CancellationToken::new(),
        }
    }

    fn start_delivery(
        &self,
        id: ListenerId,
    ) {
        if let Some(backlog) = self.pending.lock().take() {
            let task = deliver(id, self.sender.clone(), backlog, self.cancel.clone());
            tokio::spawn(task.in_current_span());
        }
    }
}

pub struct ListenerRegistry<E> {
    listeners: RwLock<BTreeMap<ListenerId, Arc<Subscriber<E>>>>,
    next_id: AtomicU64,
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> ListenerRegistry<E>
where
    E: Clone + Send + std::fmt::Debug + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender`. Adding a channel that is already registered is a
    /// no-op returning the original id.
    pub fn add(
        &self,
        sender: mpsc::Sender<E>,
    ) -> ListenerId {
        let mut listeners = self.listeners.write();
        if let Some((id, _)) = listeners
            .iter()
            .find(|(_, s)| s.sender.same_channel(&sender))
        {
            return *id;
        }

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        listeners.insert(id, Arc::new(Subscriber::new(sender)));
        trace!(?id, total = listeners.len(), "listener registered");
        id
    }

    /// Unregisters a listener and discards its undelivered events; returns
    /// false if the id was unknown
    pub fn remove(
        &self,
        id: ListenerId,
    ) -> bool {
        match self.listeners.write().remove(&id) {
            Some(subscriber) => {
                subscriber.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    fn snapshot(&self) -> Vec<(ListenerId, Arc<Subscriber<E>>)> {
        self.listeners
            .read()
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect()
    }

    /// Queues `event` for every listener registered at call time. Listeners
    /// whose receiver is gone are pruned.
    ///
    /// Must run inside a Tokio runtime: the first event queued for a listener
    /// starts its delivery task. Returns the number of listeners the event was
    /// queued for.
    pub fn dispatch(
        &self,
        event: E,
    ) -> usize {
        let mut queued = 0;
        let mut closed = vec![];

        for (id, subscriber) in self.snapshot() {
            if subscriber.sender.is_closed() || subscriber.backlog.send(event.clone()).is_err() {
                closed.push(id);
                continue;
            }
            subscriber.start_delivery(id);
            queued += 1;
        }

        if !closed.is_empty() {
            let mut listeners = self.listeners.write();
            for id in &closed {
                if let Some(subscriber) = listeners.remove(id) {
                    subscriber.cancel.cancel();
                }
            }
            debug!(pruned = closed.len(), "closed listeners removed");
        }

        trace!(?event, queued, "event dispatched");
        queued
    }
}

/// Moves one listener's backlog into its channel, in order, waiting for
/// capacity. Stops when the listener is removed or its receiver is dropped.
async fn deliver<E>(
    id: ListenerId,
    sender: mpsc::Sender<E>,
    mut backlog: mpsc::UnboundedReceiver<E>,
    cancel: CancellationToken,
) where
    E: Send + 'static,
{
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = backlog.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let send = sender.send(event);
        tokio::pin!(send);
        let mut stalled = false;
        let sent = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = &mut send => break result.is_ok(),
                _ = sleep(STALL_WARNING), if !stalled => {
                    stalled = true;
                    warn!(?id, "listener is not draining its channel");
                }
            }
        };
        if !sent {
            debug!(?id, "listener receiver dropped");
            break;
        }
    }
    trace!(?id, "listener delivery stopped");
}

/// Both listener sets of a store
#[derive(Default)]
pub(crate) struct Listeners {
    pub(crate) nodes: ListenerRegistry<NodeEvent>,
    pub(crate) keys: ListenerRegistry<KeyEvent>,
}
