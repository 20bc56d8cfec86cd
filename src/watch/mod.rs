//! Change watch: turns blocking key listings and roster polls into
//! [`KeyEvent`](crate::KeyEvent)s and [`NodeEvent`](crate::NodeEvent)s.

mod backoff;
mod watcher;

pub(crate) use watcher::*;

#[cfg(test)]
mod backoff_test;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

/// Owner side of a running [`ChangeWatcher`]
pub(crate) struct WatchHandle {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WatchHandle {
    pub(crate) fn start(
        watcher: ChangeWatcher,
        cancel: CancellationToken,
    ) -> Self {
        Self::from_task(watcher.spawn(), cancel)
    }

    fn from_task(
        task: JoinHandle<()>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Cancels the loop and waits for it to finish. Later calls return at once.
    ///
    /// A task that panicked is logged; the caller's shutdown goes on.
    pub(crate) async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            match task.await {
                Ok(()) => debug!("change watch task joined"),
                Err(e) => warn!(error = %e, "change watch task failed"),
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
