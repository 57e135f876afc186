//! Secondary role: one connection to the primary, with reconnection
//!
//! The receive loop owns reading. When the connection is lost it hands off
//! to a single reconnection task that walks the retry schedule; while no
//! connection exists the loop idles and re-arms that task.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use backoff::backoff::Backoff;
use parking_lot::RwLock;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result, TransportErrorKind};
use crate::protocol::{write_frame, FrameReader, Notification, NotificationCodec};

use super::{shutdown_signalled, socket, SharedListener, SyncOptions, TaskSet};

struct Connection {
    reader: AsyncMutex<FrameReader<OwnedReadHalf>>,
    writer: AsyncMutex<OwnedWriteHalf>,
}

/// A secondary attached to the primary
pub struct SyncClient {
    path: PathBuf,
    options: SyncOptions,
    codec: NotificationCodec,
    listener: SharedListener,
    connection: RwLock<Option<Arc<Connection>>>,
    reconnecting: AtomicBool,
    reconnect_attempts: AtomicU32,
    shutdown_tx: watch::Sender<bool>,
    tasks: TaskSet,
}

impl SyncClient {
    pub fn new(path: impl AsRef<Path>, options: SyncOptions, listener: SharedListener) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            path: path.as_ref().to_path_buf(),
            codec: options.codec(),
            options,
            listener,
            connection: RwLock::new(None),
            reconnecting: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            shutdown_tx,
            tasks: TaskSet::default(),
        })
    }

    /// Connect and start receiving.
    ///
    /// A failed first dial is not fatal: the receive loop keeps trying
    /// through the retry schedule.
    pub async fn start(
        path: impl AsRef<Path>,
        options: SyncOptions,
        listener: SharedListener,
    ) -> Result<Arc<Self>> {
        socket::validate_socket_path(path.as_ref())?;
        let client = Self::new(path, options, listener);

        if let Err(e) = client.connect().await {
            warn!(path = %client.path.display(), error = %e, "Initial connection failed, will retry");
            client.trigger_reconnect();
        }

        let receiver = Arc::clone(&client);
        client.tasks.spawn(receiver.receive_loop());
        Ok(client)
    }

    /// Dial the primary, replacing any connection already held
    pub async fn connect(&self) -> Result<()> {
        let stream = socket::dial(&self.path, self.options.dial_timeout).await?;
        let (read_half, write_half) = stream.into_split();

        let conn = Arc::new(Connection {
            reader: AsyncMutex::new(FrameReader::new(read_half, self.codec)),
            writer: AsyncMutex::new(write_half),
        });
        *self.connection.write() = Some(conn);

        info!(path = %self.path.display(), "Connected to primary");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Total reconnection attempts made so far
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.connection.read().clone()
    }

    /// Forget `conn` unless a newer connection already replaced it
    fn drop_connection(&self, conn: &Arc<Connection>) {
        let mut guard = self.connection.write();
        if guard.as_ref().is_some_and(|c| Arc::ptr_eq(c, conn)) {
            *guard = None;
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────

    /// Write one notification to the primary.
    ///
    /// Fails with `NotConnected` while disconnected. A write that finds the
    /// connection closed schedules a reconnection before returning.
    pub async fn send(self: &Arc<Self>, notification: &Notification) -> Result<()> {
        let conn = self.current().ok_or_else(|| Error::NotConnected {
            path: self.path.clone(),
        })?;
        let frame = self.codec.encode(notification)?;

        let result = {
            let mut writer = conn.writer.lock().await;
            write_frame(&mut *writer, &frame, self.options.write_timeout).await
        };

        if let Err(e) = &result {
            if e.is_closed() {
                warn!(error = %e, "Connection to primary lost while sending");
                self.drop_connection(&conn);
                self.trigger_reconnect();
            }
        }
        result
    }

    // ─────────────────────────────────────────────────────────────
    // Receiving
    // ─────────────────────────────────────────────────────────────

    async fn receive_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let deadline = self.options.client_read_timeout;

        loop {
            if self.is_shutting_down() {
                break;
            }

            let Some(conn) = self.current() else {
                tokio::select! {
                    _ = shutdown_signalled(&mut shutdown) => break,
                    _ = tokio::time::sleep(self.options.idle_retry_interval) => {}
                }
                self.trigger_reconnect();
                continue;
            };

            let result = {
                let mut reader = conn.reader.lock().await;
                tokio::select! {
                    _ = shutdown_signalled(&mut shutdown) => break,
                    result = reader.read_notification(deadline) => result,
                }
            };

            match result {
                Ok(notification) if notification.is_heartbeat() => {
                    trace!("Heartbeat received");
                }
                Ok(notification) => {
                    debug!(notification = %notification, "Notification received");
                    self.listener.on_notification(notification);
                }
                Err(e) => match e.transport_kind() {
                    TransportErrorKind::Timeout => continue,
                    TransportErrorKind::Other if !matches!(e, Error::Io(_)) => {
                        warn!(error = %e, "Dropping unreadable frame");
                    }
                    _ => {
                        warn!(error = %e, "Connection to primary lost");
                        self.drop_connection(&conn);
                        self.trigger_reconnect();
                        tokio::select! {
                            _ = shutdown_signalled(&mut shutdown) => break,
                            _ = tokio::time::sleep(self.options.closed_pause) => {}
                        }
                    }
                },
            }
        }

        debug!("Receive loop stopped");
    }

    // ─────────────────────────────────────────────────────────────
    // Reconnection
    // ─────────────────────────────────────────────────────────────

    /// Start a reconnection sequence unless one is already running
    fn trigger_reconnect(self: &Arc<Self>) {
        if self.is_shutting_down() {
            return;
        }
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let client = Arc::clone(self);
        self.tasks.spawn(async move {
            client.reconnect().await;
            client.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    async fn reconnect(&self) -> bool {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut schedule = self.options.retry.schedule();

        while let Some(delay) = schedule.next_backoff() {
            info!(
                attempt = schedule.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to primary"
            );

            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => return false,
                _ = tokio::time::sleep(delay) => {}
            }

            if self.is_connected() {
                return true;
            }

            self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            match self.connect().await {
                Ok(()) => return true,
                Err(e) => debug!(attempt = schedule.attempts(), error = %e, "Reconnect attempt failed"),
            }
        }

        warn!(
            attempts = schedule.attempts(),
            "Giving up on reconnection for now"
        );
        false
    }

    // ─────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────

    /// Stop receiving and reconnecting, then drop the connection.
    ///
    /// Safe to call more than once.
    pub async fn stop(&self) -> Result<()> {
        if self.shutdown_tx.send_replace(true) {
            return Ok(());
        }

        if !self
            .tasks
            .join(self.options.shutdown_timeout, "client")
            .await
        {
            warn!("Sync client tasks abandoned after shutdown timeout");
        }

        self.connection.write().take();
        info!("Sync client stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NotificationKind;
    use crate::sync::{NoopListener, RetryPolicy, SyncServer};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_options() -> SyncOptions {
        SyncOptions {
            idle_retry_interval: Duration::from_millis(50),
            retry: RetryPolicy {
                max_attempts: 5,
                initial_delay: Duration::from_millis(20),
                multiplier: 2.0,
                max_delay: Duration::from_millis(200),
            },
            ..Default::default()
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let dir = TempDir::new().unwrap();
        let client = SyncClient::new(
            dir.path().join("none.sock"),
            SyncOptions::default(),
            Arc::new(NoopListener),
        );

        let err = client
            .send(&Notification::new(NotificationKind::Created, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_client_receives_from_primary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.sock");
        let server = SyncServer::bind(&path, fast_options(), Arc::new(NoopListener))
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let client = SyncClient::start(
            &path,
            fast_options(),
            Arc::new(move |n: Notification| sink.lock().push(n)),
        )
        .await
        .unwrap();
        assert!(client.is_connected());
        assert!(eventually(|| server.peer_count() == 1).await);

        server
            .broadcast(Notification::new(NotificationKind::Updated, 12))
            .await
            .unwrap();
        assert!(eventually(|| seen.lock().len() == 1).await);
        assert_eq!(seen.lock()[0].subject_id(), 12);

        client.stop().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_reconnects_after_primary_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.sock");
        let first = SyncServer::bind(&path, fast_options(), Arc::new(NoopListener))
            .await
            .unwrap();

        let client = SyncClient::start(&path, fast_options(), Arc::new(NoopListener))
            .await
            .unwrap();
        assert!(eventually(|| first.peer_count() == 1).await);

        first.stop().await.unwrap();
        assert!(eventually(|| !client.is_connected()).await);

        let second = SyncServer::bind(&path, fast_options(), Arc::new(NoopListener))
            .await
            .unwrap();
        assert!(eventually(|| client.is_connected() && second.peer_count() == 1).await);
        assert!(client.reconnect_attempts() >= 1);

        client.stop().await.unwrap();
        second.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_keeps_retrying_after_schedule_exhausted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.sock");
        let options = SyncOptions {
            retry: RetryPolicy {
                max_attempts: 3,
                ..fast_options().retry
            },
            ..fast_options()
        };

        let client = SyncClient::start(&path, options.clone(), Arc::new(NoopListener))
            .await
            .unwrap();
        assert!(!client.is_connected());

        // One schedule is 20 + 40 + 80ms; leave room for the idle retry to re-arm it
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(client.reconnect_attempts() > 3);
        assert!(!client.is_connected());

        let server = SyncServer::bind(&path, options, Arc::new(NoopListener))
            .await
            .unwrap();
        assert!(eventually(|| client.is_connected() && server.peer_count() == 1).await);

        client.stop().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let client = SyncClient::start(
            dir.path().join("gone.sock"),
            fast_options(),
            Arc::new(NoopListener),
        )
        .await
        .unwrap();

        client.stop().await.unwrap();
        client.stop().await.unwrap();
        assert!(!client.is_connected());
    }
}
