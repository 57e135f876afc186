//! Inter-instance synchronization
//!
//! Lets several running copies of the task manager see each other's
//! changes through one Unix domain socket, without a separate daemon:
//! - Role election by bind-or-connect on the rendezvous socket
//! - Hub-and-spoke relay through the elected primary
//! - Reconnection with bounded backoff on secondaries
//! - Heartbeats to keep idle connections observably alive

mod client;
mod coordinator;
mod listener;
mod options;
mod retry;
mod server;
pub mod socket;

pub use client::*;
pub use coordinator::*;
pub use listener::*;
pub use options::*;
pub use retry::*;
pub use server::*;
pub use socket::{SyncMode, MAX_SOCKET_PATH_LEN};

use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Resolves once the shutdown flag is set (or its sender is gone)
pub(crate) async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

/// Background tasks owned by one role, joined under a deadline on stop
#[derive(Default)]
pub(crate) struct TaskSet {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskSet {
    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait for every task, including ones spawned while waiting.
    ///
    /// Returns false if the deadline passed; leftover tasks are aborted.
    pub(crate) async fn join(&self, timeout: Duration, role: &'static str) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let handles = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                return true;
            }

            let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
            if tokio::time::timeout_at(deadline, join_all(handles)).await.is_err() {
                warn!(
                    role,
                    timeout_ms = timeout.as_millis() as u64,
                    "Background tasks did not finish in time, aborting"
                );
                aborts.iter().for_each(|a| a.abort());
                for handle in self.handles.lock().drain(..) {
                    handle.abort();
                }
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_set_joins_finished_tasks() {
        let tasks = TaskSet::default();
        tasks.spawn(async {});
        tasks.spawn(async { tokio::time::sleep(Duration::from_millis(20)).await });

        assert!(tasks.join(Duration::from_secs(1), "test").await);
    }

    #[tokio::test]
    async fn test_task_set_gives_up_on_stuck_task() {
        let tasks = TaskSet::default();
        tasks.spawn(std::future::pending());

        let started = std::time::Instant::now();
        assert!(!tasks.join(Duration::from_millis(50), "test").await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_shutdown_signalled_when_already_set() {
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(true);
        tokio::time::timeout(Duration::from_millis(100), shutdown_signalled(&mut rx))
            .await
            .unwrap();
    }
}
