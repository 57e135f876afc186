//! Primary role: owns the rendezvous socket and relays between secondaries
//!
//! Every notification read from one peer goes to the host listener and is
//! then re-broadcast to all other peers, never echoed to its sender.
//! Heartbeats are sent on a fixed interval while peers are connected and
//! are consumed silently on receipt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::RwLock;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result, TransportErrorKind};
use crate::protocol::{write_frame, FrameReader, Notification, NotificationCodec};

use super::{shutdown_signalled, socket, SharedListener, SyncOptions, TaskSet};

/// Identity of one accepted connection
pub type PeerId = Uuid;

// ─────────────────────────────────────────────────────────────────
// Peer connection
// ─────────────────────────────────────────────────────────────────

struct PeerConnection {
    writer: AsyncMutex<OwnedWriteHalf>,
    close_tx: watch::Sender<bool>,
}

impl PeerConnection {
    async fn send_frame(&self, frame: &[u8], options: &SyncOptions) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, frame, options.write_timeout).await
    }

    fn close(&self) {
        self.close_tx.send_replace(true);
    }
}

// ─────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────

/// The elected primary
pub struct SyncServer {
    path: PathBuf,
    options: SyncOptions,
    codec: NotificationCodec,
    listener: SharedListener,
    peers: RwLock<HashMap<PeerId, Arc<PeerConnection>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: TaskSet,
    stopped: AtomicBool,
}

impl SyncServer {
    /// Claim the socket and start accepting.
    ///
    /// Fails with `AddressInUse` when another live instance owns the path.
    pub async fn bind(
        path: impl AsRef<Path>,
        options: SyncOptions,
        listener: SharedListener,
    ) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let unix_listener = socket::claim(&path).await?;
        let (shutdown_tx, _) = watch::channel(false);

        let server = Arc::new(Self {
            codec: options.codec(),
            path,
            options,
            listener,
            peers: RwLock::new(HashMap::new()),
            shutdown_tx,
            tasks: TaskSet::default(),
            stopped: AtomicBool::new(false),
        });

        info!(path = %server.path.display(), "Sync server listening");

        let accept = Arc::clone(&server);
        server.tasks.spawn(accept.accept_loop(unix_listener));
        let heartbeat = Arc::clone(&server);
        server.tasks.spawn(heartbeat.heartbeat_loop());

        Ok(server)
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Currently registered connections
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.read().keys().copied().collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────
    // Accepting
    // ─────────────────────────────────────────────────────────────

    async fn accept_loop(self: Arc<Self>, listener: UnixListener) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let poll = self.options.accept_poll_interval;

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                accepted = tokio::time::timeout(poll, listener.accept()) => match accepted {
                    // Poll interval elapsed; go round and re-check shutdown
                    Err(_) => continue,
                    Ok(Ok((stream, _addr))) => self.register(stream),
                    Ok(Err(e)) => {
                        if *shutdown.borrow() {
                            break;
                        }
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(self.options.closed_pause).await;
                    }
                },
            }
        }

        drop(listener);
        debug!("Accept loop stopped");
    }

    fn register(self: &Arc<Self>, stream: UnixStream) {
        let id = Uuid::new_v4();
        let (read_half, write_half) = stream.into_split();
        let (close_tx, close_rx) = watch::channel(false);

        let conn = Arc::new(PeerConnection {
            writer: AsyncMutex::new(write_half),
            close_tx,
        });

        let count = {
            let mut peers = self.peers.write();
            peers.insert(id, conn);
            peers.len()
        };
        debug!(peer = %id, peers = count, "Peer connected");

        let server = Arc::clone(self);
        self.tasks
            .spawn(server.read_loop(id, read_half, close_rx));
    }

    // ─────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────

    async fn read_loop(
        self: Arc<Self>,
        id: PeerId,
        read_half: OwnedReadHalf,
        mut close_rx: watch::Receiver<bool>,
    ) {
        let mut reader = FrameReader::new(read_half, self.codec);
        let mut shutdown = self.shutdown_tx.subscribe();
        let deadline = self.options.server_read_timeout;

        loop {
            let result = tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                _ = shutdown_signalled(&mut close_rx) => break,
                result = reader.read_notification(deadline) => result,
            };

            match result {
                Ok(notification) if notification.is_heartbeat() => {
                    trace!(peer = %id, "Heartbeat received");
                }
                Ok(notification) => {
                    debug!(peer = %id, notification = %notification, "Relaying notification");
                    self.listener.on_notification(notification);
                    if let Err(e) = self.broadcast_except(notification, Some(id)).await {
                        warn!(peer = %id, error = %e, "Relay failed");
                    }
                }
                Err(e) => match e.transport_kind() {
                    // Idle peer; the deadline only keeps the loop responsive
                    TransportErrorKind::Timeout => continue,
                    TransportErrorKind::Closed => {
                        debug!(peer = %id, "Peer closed connection");
                        break;
                    }
                    TransportErrorKind::Other => {
                        if matches!(e, Error::Io(_)) {
                            debug!(peer = %id, error = %e, "Peer read error");
                            break;
                        }
                        warn!(peer = %id, error = %e, "Dropping unreadable frame");
                    }
                },
            }
        }

        self.remove_peer(id);
    }

    // ─────────────────────────────────────────────────────────────
    // Broadcasting
    // ─────────────────────────────────────────────────────────────

    /// Send to every connected peer
    pub async fn broadcast(&self, notification: Notification) -> Result<usize> {
        self.broadcast_except(notification, None).await
    }

    /// Send to every connected peer except `exclude`.
    ///
    /// Writes run concurrently, each under its own deadline; a peer whose
    /// write fails is removed. Only an encoding failure is returned, since
    /// nothing was sent in that case. Returns the number of peers reached.
    pub async fn broadcast_except(
        &self,
        notification: Notification,
        exclude: Option<PeerId>,
    ) -> Result<usize> {
        let frame = self.codec.encode(&notification)?;

        let targets: Vec<(PeerId, Arc<PeerConnection>)> = self
            .peers
            .read()
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(id, conn)| (*id, Arc::clone(conn)))
            .collect();

        if targets.is_empty() {
            return Ok(0);
        }

        let frame = &frame;
        let options = &self.options;
        let results = join_all(targets.into_iter().map(|(id, conn)| async move {
            (id, conn.send_frame(frame, options).await)
        }))
        .await;

        let mut delivered = 0;
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(peer = %id, error = %e, "Failed to broadcast to peer");
                    self.remove_peer(id);
                }
            }
        }

        Ok(delivered)
    }

    fn remove_peer(&self, id: PeerId) {
        let removed = self.peers.write().remove(&id);
        if let Some(conn) = removed {
            conn.close();
            debug!(peer = %id, peers = self.peer_count(), "Peer disconnected");
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Heartbeat
    // ─────────────────────────────────────────────────────────────

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.options.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_signalled(&mut shutdown) => break,
                _ = ticker.tick() => {
                    if self.peer_count() == 0 {
                        continue;
                    }
                    match self.broadcast(Notification::heartbeat()).await {
                        Ok(reached) => trace!(peers = reached, "Heartbeat sent"),
                        Err(e) => warn!(error = %e, "Heartbeat failed"),
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────

    /// Stop accepting, close every connection and remove the socket file.
    ///
    /// Safe to call more than once.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown_tx.send_replace(true);

        let peers: Vec<Arc<PeerConnection>> =
            self.peers.write().drain().map(|(_, conn)| conn).collect();
        for conn in &peers {
            conn.close();
        }
        drop(peers);

        if !self
            .tasks
            .join(self.options.shutdown_timeout, "server")
            .await
        {
            warn!("Sync server tasks abandoned after shutdown timeout");
        }

        socket::remove_socket_file(&self.path)?;
        info!(path = %self.path.display(), "Sync server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{write_notification, NotificationKind};
    use crate::sync::NoopListener;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn collector() -> (SharedListener, Arc<Mutex<Vec<Notification>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: SharedListener = Arc::new(move |n: Notification| sink.lock().push(n));
        (listener, seen)
    }

    async fn wait_for_peers(server: &SyncServer, count: usize) {
        for _ in 0..100 {
            if server.peer_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} peers, have {}", count, server.peer_count());
    }

    struct RawPeer {
        reader: FrameReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl RawPeer {
        async fn connect(path: &Path) -> Self {
            let (r, w) = UnixStream::connect(path).await.unwrap().into_split();
            Self {
                reader: FrameReader::new(r, NotificationCodec::default()),
                writer: w,
            }
        }

        async fn send(&mut self, n: Notification) {
            write_notification(
                &mut self.writer,
                &NotificationCodec::default(),
                &n,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        }

        async fn recv(&mut self, deadline: Duration) -> Result<Notification> {
            self.reader.read_notification(deadline).await
        }
    }

    #[tokio::test]
    async fn test_broadcast_without_peers() {
        let dir = TempDir::new().unwrap();
        let server = SyncServer::bind(
            dir.path().join("s.sock"),
            SyncOptions::default(),
            Arc::new(NoopListener),
        )
        .await
        .unwrap();

        let reached = server
            .broadcast(Notification::new(NotificationKind::Created, 1))
            .await
            .unwrap();
        assert_eq!(reached, 0);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_excludes_sender() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.sock");
        let (listener, seen) = collector();
        let server = SyncServer::bind(&path, SyncOptions::default(), listener)
            .await
            .unwrap();

        let mut a = RawPeer::connect(&path).await;
        let mut b = RawPeer::connect(&path).await;
        wait_for_peers(&server, 2).await;

        a.send(Notification::new(NotificationKind::Updated, 7)).await;

        let got = b.recv(Duration::from_secs(2)).await.unwrap();
        assert_eq!(got.kind(), NotificationKind::Updated);
        assert_eq!(got.subject_id(), 7);

        let echo = a.recv(Duration::from_millis(200)).await.unwrap_err();
        assert!(echo.is_timeout());

        assert_eq!(seen.lock().len(), 1);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_not_delivered_to_listener() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.sock");
        let (listener, seen) = collector();
        let options = SyncOptions {
            heartbeat_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let server = SyncServer::bind(&path, options, listener).await.unwrap();

        let mut peer = RawPeer::connect(&path).await;
        wait_for_peers(&server, 1).await;

        let pulse = peer.recv(Duration::from_secs(2)).await.unwrap();
        assert!(pulse.is_heartbeat());

        peer.send(Notification::heartbeat()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(seen.lock().is_empty());

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_removes_peer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.sock");
        let server = SyncServer::bind(&path, SyncOptions::default(), Arc::new(NoopListener))
            .await
            .unwrap();

        let peer = RawPeer::connect(&path).await;
        wait_for_peers(&server, 1).await;
        drop(peer);
        wait_for_peers(&server, 0).await;

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_liveness_check_does_not_linger_as_peer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.sock");
        let server = SyncServer::bind(&path, SyncOptions::default(), Arc::new(NoopListener))
            .await
            .unwrap();

        let probe_path = path.clone();
        let live = tokio::task::spawn_blocking(move || socket::probe(&probe_path))
            .await
            .unwrap();
        assert!(live);
        tokio::time::sleep(Duration::from_millis(100)).await;
        wait_for_peers(&server, 0).await;

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_removes_socket_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.sock");
        let server = SyncServer::bind(&path, SyncOptions::default(), Arc::new(NoopListener))
            .await
            .unwrap();

        let mut peer = RawPeer::connect(&path).await;
        wait_for_peers(&server, 1).await;

        server.stop().await.unwrap();
        assert!(!path.exists());
        assert!(server.is_stopped());
        assert_eq!(server.peer_count(), 0);

        let err = peer.recv(Duration::from_secs(2)).await.unwrap_err();
        assert!(err.is_closed());

        server.stop().await.unwrap();
    }
}
